//! Annotation propagators: denormalize service and workload-controller
//! labels onto matching pods so the translators work from the pod
//! projection alone.

mod service_to_pod;
mod workload_to_pod;

pub use service_to_pod::ServiceToPodAnnotator;
pub use workload_to_pod::WorkloadToPodAnnotator;
