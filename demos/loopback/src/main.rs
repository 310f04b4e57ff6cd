//! Publish/subscribe over an in-memory loopback link.
//!
//! One hub publishes a counter and a synthetic sensor reading at 20 Hz;
//! the same hub receives its own frames and prints the decoded values.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use wirepack::{Hub, MemTransport, Source, TransportKind};

fn main() -> Result<()> {
	stderrlog::new().verbosity(2).init()?;

	let mut hub = Hub::new();
	let link = hub.attach(TransportKind::Serial, MemTransport::loopback());

	hub.subscribe_values::<(u32, f32), _>(link, 0x10, |(tick, level)| {
		println!("tick={:4}  level={:+.3}", tick, level);
	})?;

	let tick = Rc::new(RefCell::new(0u32));
	let start = Instant::now();
	hub.publish(
		link,
		0x10,
		Source::tuple(vec![
			Source::value(tick.clone()),
			Source::getter(move || (start.elapsed().as_secs_f32() * 3.0).sin()),
		]),
		Duration::from_millis(50),
	)?;

	for _ in 0..200 {
		*tick.borrow_mut() += 1;
		hub.update()?;
		std::thread::sleep(Duration::from_millis(10));
	}
	Ok(())
}
