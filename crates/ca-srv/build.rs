fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc unless the environment provides one.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/ca.proto")?;
    Ok(())
}
