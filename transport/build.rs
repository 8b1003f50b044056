// build.rs

fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/tagio.proto"], &["proto"])
        .expect("compiling tagio.proto");
    println!("cargo:rerun-if-changed=proto/tagio.proto");
}
