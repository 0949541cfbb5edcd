/// Move one volume to a named storage pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateVolumeRequest {
    pub volume_id: String,
    /// Name of the destination pool.
    pub pool: String,
}
