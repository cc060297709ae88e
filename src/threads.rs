use std::io;
use std::thread;

/// Starts the long-lived worker threads. Threads are named and never joined;
/// they watch the shared `running` flag and exit on their own.
pub trait Spawner {
    fn spawn<F>(&self, name: &str, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static;
}

pub struct ThreadSpawner;

impl ThreadSpawner {
    pub fn new() -> Self {
        ThreadSpawner
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawner for ThreadSpawner {
    fn spawn<F>(&self, name: &str, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new().name(name.to_string()).spawn(f)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_thread_spawner_spawn() {
        let spawner = ThreadSpawner::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        spawner
            .spawn("spawner-test", move || {
                let name = thread::current().name().map(str::to_string);
                *seen_clone.lock().unwrap() = name;
            })
            .unwrap();

        // Give the thread a moment to execute
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("spawner-test"));
    }
}
