//! Simulated time.

use std::cell::Cell;
use std::rc::Rc;

use printer_core::Clock;

/// A clock that moves forward a fixed quantum every time it is read.
///
/// The firmware's blocking waits spin on `idle()`, and `idle()` reads the
/// clock once per pass, so under this clock every spin makes progress and
/// every wait terminates deterministically.
#[derive(Clone)]
pub struct SimClock {
    now_us: Rc<Cell<u64>>,
    quantum_us: u64,
}

impl SimClock {
    pub fn new(quantum_us: u64) -> Self {
        Self {
            now_us: Rc::new(Cell::new(0)),
            quantum_us,
        }
    }

    /// A handle observing the same timeline without advancing it.
    pub fn handle(&self) -> Rc<Cell<u64>> {
        self.now_us.clone()
    }

    /// Current time without advancing.
    pub fn peek_us(&self) -> u64 {
        self.now_us.get()
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        let t = self.now_us.get() + self.quantum_us;
        self.now_us.set(t);
        t
    }
}
