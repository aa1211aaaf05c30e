//! Record id generation.

use rand::Rng;

/// Generate a `{prefix}_{millisecond-timestamp}_{3-digit-random}` id.
///
/// The random suffix makes collisions unlikely under rapid sequential
/// creation, not impossible — registries re-roll on the rare collision
/// inside an owner's record set. Ids are not lexically sortable beyond
/// timestamp granularity.
pub fn generate(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(100..1000);
    format!("{prefix}_{millis}_{suffix}")
}
