//! Build file generating gRPC stubs

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protobuf_src::protoc());

    tonic_build::configure().build_server(true).compile(
        &[
            "proto/devnet_service.proto",
            "proto/node_service.proto",
            "proto/upgrade_service.proto",
            "proto/transaction_service.proto",
            "proto/network_service.proto",
            "proto/auth_service.proto",
        ],
        &["proto"],
    )?;

    Ok(())
}
