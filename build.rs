use std::io::Result;

fn main() -> Result<()> {
    unsafe {
        std::env::set_var(
            "PROTOC",
            protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"),
        );
    }
    tonic_build::configure()
        .build_server(false)
        .compile_protos(
            &["proto/transparency.proto", "proto/kt.proto"],
            &["proto/"],
        )?;
    Ok(())
}
