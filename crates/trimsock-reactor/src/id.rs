use std::rc::Rc;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Default length of generated exchange ids.
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Produces ids for outgoing requests.
pub type IdGenerator = Rc<dyn Fn() -> String>;

/// Random alphanumeric id of `length` characters.
pub fn random_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generator drawing random alphanumeric ids of a fixed length.
pub fn random_ids(length: usize) -> IdGenerator {
    Rc::new(move || random_id(length))
}

/// Generator yielding `prefix0`, `prefix1`, and so on.
pub fn sequential_ids(prefix: impl Into<String>) -> IdGenerator {
    let prefix = prefix.into();
    let next = std::cell::Cell::new(0u64);
    Rc::new(move || {
        let id = next.get();
        next.set(id + 1);
        format!("{prefix}{id}")
    })
}
