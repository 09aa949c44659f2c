//! Build script for buildtunnel-proxy.
//!
//! Generates one server trait per proxied service. Every method carries raw
//! protobuf frames (`bytes::Bytes`) through `RawCodec`, so no `.proto` files
//! or `protoc` are needed and unknown fields survive forwarding untouched.

use tonic_build::manual::{Builder, Method, Service};

#[derive(Clone, Copy)]
enum Shape {
    Unary,
    ServerStreaming,
    Bidi,
}

use Shape::{Bidi, ServerStreaming, Unary};

fn method(name: &str, route: &str, shape: Shape) -> Method {
    let builder = Method::builder()
        .name(name)
        .route_name(route)
        .input_type("::bytes::Bytes")
        .output_type("::bytes::Bytes")
        .codec_path("crate::codec::RawCodec");
    let builder = match shape {
        Unary => builder,
        ServerStreaming => builder.server_streaming(),
        Bidi => builder.client_streaming().server_streaming(),
    };
    builder.build()
}

fn service(package: &str, name: &str, methods: &[(&str, &str, Shape)]) -> Service {
    methods
        .iter()
        .fold(
            Service::builder().name(name).package(package),
            |service, &(name, route, shape)| service.method(method(name, route, shape)),
        )
        .build()
}

fn main() {
    let services = [
        service(
            "moby.buildkit.v1",
            "Control",
            &[
                ("disk_usage", "DiskUsage", Unary),
                ("prune", "Prune", ServerStreaming),
                ("solve", "Solve", Unary),
                ("status", "Status", ServerStreaming),
                ("session", "Session", Bidi),
                ("list_workers", "ListWorkers", Unary),
                ("info", "Info", Unary),
                ("listen_build_history", "ListenBuildHistory", ServerStreaming),
                ("update_build_history", "UpdateBuildHistory", Unary),
            ],
        ),
        service(
            "moby.buildkit.v1.frontend",
            "LLBBridge",
            &[
                ("resolve_image_config", "ResolveImageConfig", Unary),
                ("resolve_source_meta", "ResolveSourceMeta", Unary),
                ("solve", "Solve", Unary),
                ("read_file", "ReadFile", Unary),
                ("read_dir", "ReadDir", Unary),
                ("stat_file", "StatFile", Unary),
                ("evaluate", "Evaluate", Unary),
                ("ping", "Ping", Unary),
                ("return_result", "Return", Unary),
                ("inputs", "Inputs", Unary),
                ("new_container", "NewContainer", Unary),
                ("release_container", "ReleaseContainer", Unary),
                ("exec_process", "ExecProcess", Bidi),
                ("warn", "Warn", Unary),
            ],
        ),
        service(
            "containerd.services.content.v1",
            "Content",
            &[
                ("info", "Info", Unary),
                ("update", "Update", Unary),
                ("list", "List", ServerStreaming),
                ("delete", "Delete", Unary),
                ("read", "Read", ServerStreaming),
                ("status", "Status", Unary),
                ("list_statuses", "ListStatuses", Unary),
                ("write", "Write", Bidi),
                ("abort", "Abort", Unary),
            ],
        ),
        service(
            "containerd.services.leases.v1",
            "Leases",
            &[
                ("create", "Create", Unary),
                ("delete", "Delete", Unary),
                ("list", "List", Unary),
                ("add_resource", "AddResource", Unary),
                ("delete_resource", "DeleteResource", Unary),
                ("list_resources", "ListResources", Unary),
            ],
        ),
        service(
            "grpc.health.v1",
            "Health",
            &[("check", "Check", Unary), ("watch", "Watch", ServerStreaming)],
        ),
        service(
            "opentelemetry.proto.collector.trace.v1",
            "TraceService",
            &[("export", "Export", Unary)],
        ),
    ];

    Builder::new().build_client(false).compile(&services);
}
