use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::database::error::{internal_error, DatabaseResult};

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct PushState {
    last_push_time: u64,
    last_rand_chars: [u8; 12],
}

static PUSH_STATE: LazyLock<Mutex<PushState>> = LazyLock::new(|| {
    Mutex::new(PushState {
        last_push_time: 0,
        last_rand_chars: [0; 12],
    })
});

/// Generates a push key for the current wall-clock time.
///
/// Fails when the system clock reports a time before the Unix epoch, in which
/// case no key can be ordered against previously generated ones.
pub(crate) fn generate_push_id() -> DatabaseResult<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| internal_error(format!("System clock before Unix epoch: {err}")))?;
    let millis = u64::try_from(now.as_millis())
        .map_err(|_| internal_error("System clock out of range for push ids"))?;
    Ok(next_push_id(millis))
}

/// Encodes `now` into eight base64 characters followed by twelve random ones.
///
/// Keys generated within the same millisecond increment the random suffix, so
/// ids stay strictly increasing in lexicographic order within a process.
pub(crate) fn next_push_id(mut now: u64) -> String {
    let mut state = PUSH_STATE.lock().unwrap_or_else(PoisonError::into_inner);
    let duplicate_time = now == state.last_push_time;
    state.last_push_time = now;

    let mut timestamp_chars = [0u8; 8];
    for slot in timestamp_chars.iter_mut().rev() {
        let index = (now % 64) as usize;
        now /= 64;
        *slot = PUSH_CHARS[index];
    }
    debug_assert!(now == 0, "push id timestamp overflowed base64 encoding");

    if !duplicate_time {
        let mut rng = rand::thread_rng();
        for char_slot in state.last_rand_chars.iter_mut() {
            *char_slot = rng.gen_range(0..64);
        }
    } else {
        increment_suffix(&mut state.last_rand_chars);
    }

    let mut id = String::with_capacity(20);
    id.extend(timestamp_chars.iter().map(|ch| *ch as char));
    id.extend(
        state
            .last_rand_chars
            .iter()
            .map(|index| PUSH_CHARS[*index as usize] as char),
    );

    debug_assert_eq!(id.len(), 20, "push id should be 20 characters");
    id
}

fn increment_suffix(chars: &mut [u8; 12]) {
    let mut index = chars.len();
    while index > 0 && chars[index - 1] == 63 {
        chars[index - 1] = 0;
        index -= 1;
    }
    if index == 0 {
        // wrapped; the next millisecond reseeds
        chars[0] = 0;
    } else {
        chars[index - 1] += 1;
    }
}
