pub mod test_helpers {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Condvar, Mutex, PoisonError};
    use std::time::{Duration, Instant};

    use flume::{Receiver, Sender};
    use image::{Rgba, RgbaImage};

    use crate::backend::RenderBackend;
    use crate::coordinator::Coordinator;
    use crate::delivery::RenderEvent;
    use crate::error::RenderError;
    use crate::types::{Bitmap, Geometry, PageKind};

    /// Longest a gated render waits before giving up, so a broken test fails instead of hanging
    const GATE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Route `log` output through the test harness
    pub fn init_test_logging() {
        let _ = simplelog::TestLogger::init(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
        );
    }

    /// One call received by a [`RecordingBackend`]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RenderCall {
        pub page: usize,
        pub kind: PageKind,
        pub geometry: Geometry,
    }

    /// Latch that holds back renders until the test opens it
    #[derive(Clone, Default)]
    pub struct Gate {
        state: Arc<(Mutex<bool>, Condvar)>,
    }

    impl Gate {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn open(&self) {
            let (open, cvar) = &*self.state;
            *open.lock().unwrap_or_else(PoisonError::into_inner) = true;
            cvar.notify_all();
        }

        pub fn wait(&self) {
            let (open, cvar) = &*self.state;
            let guard = open.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = cvar
                .wait_timeout_while(guard, GATE_TIMEOUT, |open| !*open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Backend that records every call and paints pages a solid color.
    ///
    /// Clones share the call log, so a test keeps one clone and hands the
    /// other to the coordinator.
    #[derive(Clone)]
    pub struct RecordingBackend {
        calls: Arc<Mutex<Vec<RenderCall>>>,
        failing: Arc<Mutex<HashSet<usize>>>,
        gates: HashMap<usize, Gate>,
        entered: (Sender<RenderCall>, Receiver<RenderCall>),
    }

    impl Default for RecordingBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RecordingBackend {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                failing: Arc::new(Mutex::new(HashSet::new())),
                gates: HashMap::new(),
                entered: flume::unbounded(),
            }
        }

        /// Block renders of `page` until `gate` opens
        pub fn with_gate(mut self, page: usize, gate: &Gate) -> Self {
            self.gates.insert(page, gate.clone());
            self
        }

        /// Make renders of `page` fail until [`RecordingBackend::heal`] is called
        pub fn fail_page(&self, page: usize) {
            self.failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(page);
        }

        pub fn heal(&self, page: usize) {
            self.failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&page);
        }

        /// Every call so far, in arrival order
        pub fn calls(&self) -> Vec<RenderCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn calls_for(&self, page: usize) -> Vec<RenderCall> {
            self.calls()
                .into_iter()
                .filter(|call| call.page == page)
                .collect()
        }

        /// Wait until a render has started
        pub fn wait_entered(&self, timeout: Duration) -> Option<RenderCall> {
            self.entered.1.recv_timeout(timeout).ok()
        }

        /// Color painted for a page, so tests can tell bitmaps apart
        pub fn color_of(page: usize, kind: PageKind) -> Rgba<u8> {
            let kind = match kind {
                PageKind::Regular => 0,
                PageKind::Content => 1,
                PageKind::Notes => 2,
            };
            Rgba([(page % 256) as u8, kind, 0, 255])
        }
    }

    impl RenderBackend for RecordingBackend {
        fn render(
            &mut self,
            page: usize,
            kind: PageKind,
            geometry: Geometry,
        ) -> Result<Bitmap, RenderError> {
            let call = RenderCall {
                page,
                kind,
                geometry,
            };
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
            let _ = self.entered.0.send(call);

            if let Some(gate) = self.gates.get(&page) {
                gate.wait();
            }

            let failing = self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&page);
            if failing {
                return Err(RenderError::backend(format!("page {page} is corrupt")));
            }

            Ok(Arc::new(RgbaImage::from_pixel(
                geometry.width,
                geometry.height,
                Self::color_of(page, kind),
            )))
        }
    }

    /// Collect up to `count` events, waiting at most `timeout` overall
    pub fn wait_for_events(
        coord: &Coordinator,
        count: usize,
        timeout: Duration,
    ) -> Vec<RenderEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match coord.event_receiver().recv_timeout(remaining) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::test_helpers::*;
    use crate::backend::RenderBackend;
    use crate::types::{Geometry, PageKind};

    #[test]
    fn recording_backend_logs_and_fails_on_request() {
        let handle = RecordingBackend::new();
        let mut backend = handle.clone();
        let size = Geometry::new(4, 3);

        let bitmap = backend.render(2, PageKind::Notes, size).unwrap();
        assert_eq!(
            *bitmap.get_pixel(0, 0),
            RecordingBackend::color_of(2, PageKind::Notes)
        );

        handle.fail_page(5);
        assert!(backend.render(5, PageKind::Regular, size).is_err());
        handle.heal(5);
        assert!(backend.render(5, PageKind::Regular, size).is_ok());

        assert_eq!(handle.calls().len(), 3);
        assert_eq!(handle.calls_for(5).len(), 2);
        assert!(handle.wait_entered(Duration::from_millis(10)).is_some());
    }
}
