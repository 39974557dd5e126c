fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/tron.proto");
    tonic_prost_build::configure().compile_protos(&["proto/tron.proto"], &["proto"])?;
    Ok(())
}
