/// Evacuate every workload from one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainRequest {
    /// Name of the host to drain.
    pub host: String,
    /// Name of a host to send every workload to instead of letting the control plane choose.
    pub target: Option<String>,
}
