use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(input)
        .output_type(output)
        .codec_path(CODEC)
        .build()
}

fn main() {
    let metrics = Service::builder()
        .name("Metrics")
        .package("meter.v1")
        .method(unary(
            "batch_update",
            "BatchUpdate",
            "crate::BatchUpdateRequest",
            "crate::BatchUpdateResponse",
        ))
        .method(unary(
            "batch_update_encrypted",
            "BatchUpdateEncrypted",
            "crate::BatchUpdateEncryptedRequest",
            "crate::BatchUpdateResponse",
        ))
        .build();

    let health = Service::builder()
        .name("Health")
        .package("meter.v1")
        .method(unary(
            "ping",
            "Ping",
            "crate::PingRequest",
            "crate::PingResponse",
        ))
        .build();

    Builder::new()
        .build_client(true)
        .build_server(true)
        .compile(&[metrics, health]);

    println!("cargo:rerun-if-changed=build.rs");
}
