use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::error::Result;

/// Well-known injection point names.
pub mod points {
    pub const BEFORE_SEGMENT_FLUSH: &str = "before_segment_flush";
    pub const BEFORE_META_WRITE: &str = "before_meta_write";
    pub const BEFORE_MARKER_WRITE: &str = "before_marker_write";
    pub const BEFORE_TOKEN_WRITER_ADD: &str = "before_token_writer_add";
    pub const BEFORE_GRAPH_SEARCH: &str = "before_graph_search";
}

type FaultHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Named fault-injection hooks consulted at known points in the build and
/// query paths. Owned by the engine runtime and passed down by reference;
/// empty outside of tests, where firing a point is a no-op.
pub struct FaultRegistry {
    hooks: Mutex<HashMap<&'static str, FaultHook>>,
}

impl FaultRegistry {
    pub fn new() -> Self {
        FaultRegistry {
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Arm a hook; the next `fire` of that point runs it.
    pub fn arm<F>(&self, point: &'static str, hook: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.lock().insert(point, Box::new(hook));
    }

    pub fn disarm(&self, point: &'static str) {
        self.hooks.lock().remove(point);
    }

    pub fn fire(&self, point: &'static str) -> Result<()> {
        let hooks = self.hooks.lock();
        match hooks.get(point) {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl Default for FaultRegistry {
    fn default() -> Self {
        FaultRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{Error, ErrorKind};

    #[test]
    fn unarmed_point_is_noop() {
        let registry = FaultRegistry::new();
        assert!(registry.fire(points::BEFORE_SEGMENT_FLUSH).is_ok());
    }

    #[test]
    fn armed_point_fires_and_disarms() {
        let registry = FaultRegistry::new();
        registry.arm(points::BEFORE_MARKER_WRITE, || {
            Err(Error::new(ErrorKind::Io, "injected"))
        });
        assert!(registry.fire(points::BEFORE_MARKER_WRITE).is_err());
        registry.disarm(points::BEFORE_MARKER_WRITE);
        assert!(registry.fire(points::BEFORE_MARKER_WRITE).is_ok());
    }
}
