//! Soft-real-time loop that walks a proxy object through a stream of
//! authoritative future positions.
//!
//! The receive side pushes packed locations into a fixed queue; a
//! dedicated thread pops them and decides, per future, between an
//! engine-side translation (same area, cell attached) and a teleport.
//! Two deadlines bound how long the loop waits for the host to report
//! that the previous animation finished, so a missed completion signal
//! can never wedge the backlog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use friendlink::{
    distance_between, in_same_cell, in_same_world_space, time_subtract, FixedQueue, Location,
};

use crate::driver::{ProxyRef, WorldDriver};

/// How far a future must be from the current position before the proxy
/// is considered moving.
const MOVEMENT_THRESHOLD: f32 = 5.0;
/// Added to both deadlines on every motion.
const TRANSLATION_DELAY: Duration = Duration::from_millis(0);
/// Grace period before the first motion after construction.
const START_DELAY_MS: i32 = 100;
/// Converts distance over time-in-milliseconds into engine speed units.
const SPEED_SCALE: f32 = 1050.0;

struct Shared {
    driver: Arc<dyn WorldDriver>,
    proxy: ProxyRef,
    future: FixedQueue,
    stop: AtomicBool,
    exit: AtomicBool,
    translating_complete: AtomicBool,
    deadlines: Mutex<Deadlines>,
}

#[derive(Clone, Copy)]
struct Deadlines {
    end_single: Instant,
    end_double: Instant,
}

pub struct Translator {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Translator {
    pub fn new(driver: Arc<dyn WorldDriver>, proxy: ProxyRef) -> Self {
        let now = Instant::now();
        let shared = Arc::new(Shared {
            driver,
            proxy,
            future: FixedQueue::new(),
            stop: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            translating_complete: AtomicBool::new(true),
            deadlines: Mutex::new(Deadlines {
                end_single: now,
                end_double: now,
            }),
        });
        shared.set_end_time(START_DELAY_MS);

        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("translator".into())
            .spawn(move || update_loop(loop_shared))
            .expect("spawn translator thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Queues an authoritative future position.
    pub fn push(&self, location: &Location) {
        self.shared.future.push(location.encode().to_vec());
    }

    /// The host calls this when the engine finishes a translation.
    pub fn mark_complete(&self) {
        self.shared
            .translating_complete
            .store(true, Ordering::SeqCst);
    }

    /// Waits for the in-flight motion to drain, then pauses new motion.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wait();
    }

    pub fn start(&self) {
        self.shared.stop.store(false, Ordering::SeqCst);
    }
}

impl Drop for Translator {
    fn drop(&mut self) {
        self.shared.exit.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn update_loop(shared: Arc<Shared>) {
    let mut current = Location::empty();
    while !shared.exit.load(Ordering::SeqCst) {
        if shared.stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        match shared.future.pop() {
            Some(bytes) => match Location::decode(&bytes) {
                Ok(future) => {
                    if time_subtract(&future, &current) > 1 {
                        shared.advance(&mut current, future);
                    }
                }
                Err(e) => log::warn!("discarding malformed future location: {e}"),
            },
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
}

impl Shared {
    fn advance(&self, current: &mut Location, future: Location) {
        if !self.is_new_area(current, &future) && self.driver.cell_attached(&future) {
            self.translate(current, future);
        } else {
            self.teleport(current, future);
        }
    }

    /// Smooth engine motion within the loaded area.
    fn translate(&self, current: &mut Location, future: Location) {
        let time = time_subtract(&future, current);
        let distance = distance_between(&future, current);
        if distance > MOVEMENT_THRESHOLD {
            self.wait();
            self.driver
                .translate_to(self.proxy, &future, distance * SPEED_SCALE / time as f32);
            self.translating_complete.store(false, Ordering::SeqCst);
        }
        *current = future;
        self.set_end_time(time);
    }

    /// Cell or world-space change: drain the previous motion, then jump.
    /// The sleeps either side of the jump keep the pacing close to the
    /// source's timeline.
    fn teleport(&self, current: &mut Location, future: Location) {
        let time = time_subtract(&future, current).max(1);
        self.wait();
        *current = future;
        self.set_end_time(time);
        let pacing = Duration::from_millis(time as u64 / 5);
        thread::sleep(pacing);
        self.driver.change_cell_to(self.proxy, &future);
        thread::sleep(pacing);
    }

    /// Blocks until `end_double` passes, or `end_single` passes and the
    /// host reported the animation complete.
    fn wait(&self) {
        loop {
            let now = Instant::now();
            let deadlines = *self.deadlines.lock().unwrap();
            if now > deadlines.end_double
                || (now > deadlines.end_single
                    && self.translating_complete.load(Ordering::SeqCst))
            {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn set_end_time(&self, ms_to_end: i32) {
        let ms = ms_to_end.max(0) as u64;
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock().unwrap();
        deadlines.end_single = now + Duration::from_millis(ms) + TRANSLATION_DELAY;
        deadlines.end_double = now + Duration::from_millis(2 * ms) + TRANSLATION_DELAY;
    }

    /// A future belongs to a new area when the world spaces differ, or
    /// the cell changed and either side is interior. Exterior-to-
    /// exterior cell crossings inside one world space stay translatable.
    fn is_new_area(&self, current: &Location, future: &Location) -> bool {
        let interior =
            |location: &Location| location.has_cell() && self.driver.is_interior(location.cell_id());
        let new_cell =
            !in_same_cell(future, current) && (interior(future) || interior(current));
        let new_world = !in_same_world_space(future, current);
        new_world || new_cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use friendlink::codec;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        TranslateTo { cell: u32, speed: f32 },
        ChangeCellTo { cell: u32 },
    }

    #[derive(Default)]
    struct MockDriver {
        calls: StdMutex<Vec<Call>>,
        interior_cells: StdMutex<HashSet<u32>>,
    }

    impl MockDriver {
        fn mark_interior(&self, cell_id: u32) {
            self.interior_cells.lock().unwrap().insert(cell_id);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl WorldDriver for MockDriver {
        fn place_proxy(&self) -> ProxyRef {
            1
        }
        fn remove_proxy(&self, _proxy: ProxyRef) {}
        fn set_name(&self, _proxy: ProxyRef, _name: &str) {}
        fn translate_to(&self, _proxy: ProxyRef, target: &Location, speed: f32) {
            self.calls.lock().unwrap().push(Call::TranslateTo {
                cell: target.cell_id(),
                speed,
            });
        }
        fn change_cell_to(&self, _proxy: ProxyRef, target: &Location) {
            self.calls.lock().unwrap().push(Call::ChangeCellTo {
                cell: target.cell_id(),
            });
        }
        fn cell_attached(&self, _target: &Location) -> bool {
            true
        }
        fn is_interior(&self, cell_id: u32) -> bool {
            self.interior_cells.lock().unwrap().contains(&cell_id)
        }
        fn local_proxy(&self) -> ProxyRef {
            0
        }
        fn local_name(&self) -> String {
            String::new()
        }
        fn local_cell_name(&self) -> String {
            String::new()
        }
        fn local_world_space_name(&self) -> String {
            String::new()
        }
        fn local_location(&self) -> Location {
            Location::empty()
        }
        fn local_loaded_state(&self) -> friendlink::LoadedState {
            friendlink::LoadedState::default()
        }
    }

    /// Builds a location with a hand-picked timestamp by patching the
    /// encoded form.
    fn future_at(elapsed_ms: i32, cell_id: u32, position: [f32; 3]) -> Location {
        let mut bytes = Location::new(None, Some(cell_id), position).encode();
        bytes[0..4].copy_from_slice(&codec::pack_i32(elapsed_ms));
        Location::decode(&bytes).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn nearby_future_in_same_cell_translates_with_scaled_speed() {
        let driver = Arc::new(MockDriver::default());
        let translator = Translator::new(Arc::clone(&driver) as Arc<dyn WorldDriver>, 1);

        // First future seeds `current`; the empty starting location has
        // distance zero, so no motion is issued for it.
        translator.push(&future_at(1_000, 2, [0.0, 0.0, 0.0]));
        // 200 units in 200 ms.
        translator.push(&future_at(1_200, 2, [200.0, 0.0, 0.0]));

        assert!(
            wait_for(|| !driver.calls().is_empty(), Duration::from_secs(2)),
            "translator never invoked the driver"
        );
        let calls = driver.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::TranslateTo { cell, speed } => {
                assert_eq!(*cell, 2);
                assert!((speed - 1050.0).abs() < 0.5, "speed was {speed}");
            }
            other => panic!("expected a translation, got {other:?}"),
        }
    }

    #[test]
    fn future_in_new_interior_cell_teleports() {
        let driver = Arc::new(MockDriver::default());
        driver.mark_interior(3);
        let translator = Translator::new(Arc::clone(&driver) as Arc<dyn WorldDriver>, 1);

        translator.push(&future_at(1_000, 2, [0.0, 0.0, 0.0]));
        translator.push(&future_at(1_200, 2, [200.0, 0.0, 0.0]));
        assert!(wait_for(
            || !driver.calls().is_empty(),
            Duration::from_secs(2)
        ));
        // Release the in-flight translation so the teleport's wait does
        // not have to run out the double deadline.
        translator.mark_complete();

        translator.push(&future_at(1_400, 3, [200.0, 0.0, 0.0]));
        assert!(
            wait_for(|| driver.calls().len() >= 2, Duration::from_secs(2)),
            "teleport never happened"
        );
        assert_eq!(driver.calls()[1], Call::ChangeCellTo { cell: 3 });
    }

    #[test]
    fn stale_future_is_ignored() {
        let driver = Arc::new(MockDriver::default());
        let translator = Translator::new(Arc::clone(&driver) as Arc<dyn WorldDriver>, 1);

        translator.push(&future_at(1_000, 2, [0.0, 0.0, 0.0]));
        // Same timestamp: delta 0 is below the reorder threshold.
        translator.push(&future_at(1_000, 2, [500.0, 0.0, 0.0]));

        thread::sleep(Duration::from_millis(300));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn movement_below_threshold_does_not_translate() {
        let driver = Arc::new(MockDriver::default());
        let translator = Translator::new(Arc::clone(&driver) as Arc<dyn WorldDriver>, 1);

        translator.push(&future_at(1_000, 2, [0.0, 0.0, 0.0]));
        translator.push(&future_at(1_200, 2, [3.0, 0.0, 0.0]));

        thread::sleep(Duration::from_millis(300));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn stop_pauses_and_start_resumes() {
        let driver = Arc::new(MockDriver::default());
        let translator = Translator::new(Arc::clone(&driver) as Arc<dyn WorldDriver>, 1);

        translator.push(&future_at(1_000, 2, [0.0, 0.0, 0.0]));
        thread::sleep(Duration::from_millis(50));
        translator.stop();

        translator.push(&future_at(1_200, 2, [200.0, 0.0, 0.0]));
        thread::sleep(Duration::from_millis(300));
        assert!(driver.calls().is_empty(), "moved while stopped");

        translator.start();
        assert!(
            wait_for(|| !driver.calls().is_empty(), Duration::from_secs(2)),
            "did not resume after start"
        );
    }
}
