fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().compile(&["proto/monitoring.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/monitoring.proto");
    Ok(())
}
