use crate::handlers::{callbacks, instances, rollout};
use gshub_common::{
    Instance, InstanceBurnedCycle, InstanceCycle, InstanceStatus, InstanceView, Service,
    StartupHandshake, UsageSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        // Instances (user session)
        instances::create_instance,
        instances::list_instances,
        instances::start_instance,
        instances::stop_instance,
        instances::terminate_instance,
        instances::instance_usage,
        rollout::rollout_update,
        // Instance callbacks
        callbacks::instance_startup,
        callbacks::instance_shutdown,
        callbacks::instance_cycles
    ),
    components(
        schemas(
            Instance,
            InstanceView,
            InstanceStatus,
            InstanceCycle,
            InstanceBurnedCycle,
            Service,
            StartupHandshake,
            UsageSummary,
            instances::CreateInstanceRequest,
            rollout::RolloutResponse,
            callbacks::StartupRequest,
            callbacks::ShutdownRequest,
            callbacks::ShutdownResponse,
            callbacks::CyclesRequest,
            callbacks::CyclesResponse
        )
    ),
    tags(
        (name = "gshub-api", description = "Game-server instance lifecycle API")
    )
)]
pub struct ApiDoc;
