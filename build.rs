use tonic_build::manual::{Builder, Method, Service};

const PROST_CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path(PROST_CODEC)
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are hand-written prost structs in src/proto.rs; only the
    // service stubs are generated, so no protoc is needed at build time.
    let resource = Service::builder()
        .name("ResourceService")
        .package("hashfleet")
        .method(method("ping", "Ping", "AuthRequest", "PingResponse"))
        .method(method(
            "resource_hardware",
            "ResourceHardware",
            "AuthRequest",
            "HardwareResponse",
        ))
        .method(method(
            "resource_tools",
            "ResourceTools",
            "AuthRequest",
            "ToolsResponse",
        ))
        .method(method("add_task", "AddTask", "TaskRequest", "TaskResponse"))
        .method(method("task_status", "TaskStatus", "TaskRequest", "TaskResponse"))
        .method(method("task_run", "TaskRun", "TaskRequest", "TaskResponse"))
        .method(method("task_pause", "TaskPause", "TaskRequest", "TaskResponse"))
        .method(method("task_quit", "TaskQuit", "TaskRequest", "TaskResponse"))
        .method(method(
            "all_task_status",
            "AllTaskStatus",
            "AuthRequest",
            "JobListResponse",
        ))
        .build();

    Builder::new().compile(&[resource]);
}
