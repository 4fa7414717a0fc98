//! Header names, defaults, and well-known identifiers used by the
//! orchestration core.

/// Response header carrying the entity tag of a read.
pub const ETAG_HEADER: &str = "ETag";

/// Request header carrying the precondition tag of a write.
pub const IF_MATCH_HEADER: &str = "If-Match";

/// Default delay before the second status fetch, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound for the backed-off poll delay, in milliseconds.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Growth factor applied to the poll delay after every pending tick.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Default wall-clock bound for one orchestration call (60 minutes).
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 3_600_000;

/// File consulted by [`OrchestratorConfig::load`](crate::config::OrchestratorConfig::load).
pub const CONFIG_FILE_NAME: &str = ".prism-tasks.toml";

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "PRISM_TASKS_";

// Completion detail names reported by the task service.

/// Completion detail naming a freshly created protection policy.
pub const COMPLETION_DETAIL_PROTECTION_POLICY: &str = "protectionPolicyExtId";

/// Completion detail naming a freshly created recovery point.
pub const COMPLETION_DETAIL_RECOVERY_POINT: &str = "recoveryPointExtId";

/// Completion detail listing the VMs restored from a recovery point.
pub const COMPLETION_DETAIL_VM_EXT_IDS: &str = "vmExtIds";

/// Completion detail listing the volume groups restored from a recovery point.
pub const COMPLETION_DETAIL_VG_EXT_IDS: &str = "volumeGroupExtIds";

// Relation kinds used in the `entitiesAffected` list of a task.

/// Virtual machine.
pub const REL_VM: &str = "vmm:ahv:config:vm";

/// Disk attached to a virtual machine.
pub const REL_VM_DISK: &str = "vmm:ahv:config:vm:disk";

/// Virtual NIC attached to a virtual machine.
pub const REL_VM_NIC: &str = "vmm:ahv:config:vm:nic";

/// VM template.
pub const REL_TEMPLATE: &str = "vmm:content:template";

/// Subnet.
pub const REL_SUBNET: &str = "networking:config:subnet";

/// Protection policy.
pub const REL_PROTECTION_POLICY: &str = "datapolicies:config:protection-policy";

/// Storage policy.
pub const REL_STORAGE_POLICY: &str = "datapolicies:config:storage-policy";

/// Recovery point.
pub const REL_RECOVERY_POINT: &str = "dataprotection:config:recovery-point";
