use rand::Rng;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const INSTANCE_ID_BYTES: usize = 8;

// -----------------------------------------------------------------------------
// ----- InstanceIdentity ------------------------------------------------------

/// Who this gateway instance is on the bus. Fixed for the lifetime of the
/// process; a restart gets a fresh `instance_id` and therefore a fresh
/// self channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
}

// -----------------------------------------------------------------------------
// ----- InstanceIdentity: Static ----------------------------------------------

impl InstanceIdentity {
    pub fn new(host: impl Into<String>, port: u16, instance_id: impl Into<String>) -> Self {
        InstanceIdentity {
            host: host.into(),
            port,
            instance_id: instance_id.into(),
        }
    }

    /// Random hex token. Unlike a process id it stays unique across hosts that
    /// share one bus.
    pub fn random_instance_id() -> String {
        let mut rng = rand::rng();
        let bytes: [u8; INSTANCE_ID_BYTES] = rng.random();

        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
