use std::{
  io::{self, Read},
  ptr,
};

use log::{LevelFilter, Log, Metadata, Record};
use tagalloc::{FreeListAllocator, ProgramBreak, Region, ReservedRegion};

/// Writes log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
  fn enabled(
    &self,
    _metadata: &Metadata,
  ) -> bool {
    true
  }

  fn log(
    &self,
    record: &Record,
  ) {
    eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
  }

  fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Waits until the user presses ENTER when running with `--step`.
/// Useful to inspect the process with `pmap` or `gdb` between steps.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = io::stdin().bytes().next();
  }
}

fn dump<R: Region>(allocator: &FreeListAllocator<R>) {
  let _ = allocator.dump(&mut io::stdout().lock());
}

fn run<R: Region>(
  mut allocator: FreeListAllocator<R>,
  step: bool,
) {
  println!("[start] fresh arena");
  dump(&allocator);
  pause(step);

  // --------------------------------------------------------------------
  // 1) A u32 fits in the initial minimum-sized block.
  // --------------------------------------------------------------------
  let Some(first) = allocator.allocate(size_of::<u32>()) else {
    return;
  };
  let first_ptr = first.as_ptr().cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("\n[1] allocate u32 at {first:p}, value = 0x{:X}", unsafe {
    first_ptr.read()
  });
  dump(&allocator);
  pause(step);

  // --------------------------------------------------------------------
  // 2) 12 bytes: the arena grows by a page, which is then split.
  // --------------------------------------------------------------------
  let Some(second) = allocator.allocate(12) else {
    return;
  };
  unsafe { ptr::write_bytes(second.as_ptr(), 0xAB, 12) };
  println!("\n[2] allocate [u8; 12] at {second:p}");
  dump(&allocator);
  pause(step);

  // --------------------------------------------------------------------
  // 3) Free the first block and ask for something of the same size.
  // --------------------------------------------------------------------
  if let Err(err) = unsafe { allocator.free(first.as_ptr()) } {
    println!("free failed: {err}");
  }
  let Some(third) = allocator.allocate(2) else {
    return;
  };
  println!(
    "\n[3] freed {first:p}, allocate [u8; 2] at {third:p}: {}",
    if third == first {
      "reused the freed block"
    } else {
      "allocated somewhere else"
    }
  );
  dump(&allocator);
  pause(step);

  // --------------------------------------------------------------------
  // 4) 64 KiB forces the arena to grow and merge with its free tail.
  // --------------------------------------------------------------------
  let before = allocator.heap_size();
  let Some(big) = allocator.allocate(64 * 1024) else {
    return;
  };
  println!(
    "\n[4] allocate 64 KiB at {big:p}, arena {} -> {} bytes",
    before,
    allocator.heap_size()
  );
  allocator.log_heap();
  pause(step);

  // --------------------------------------------------------------------
  // 5) Free everything: the arena collapses into one free block.
  // --------------------------------------------------------------------
  for ptr in [second, third, big] {
    if let Err(err) = unsafe { allocator.free(ptr.as_ptr()) } {
      println!("free failed: {err}");
    }
  }
  println!(
    "\n[5] freed everything: {} free block(s), {} free bytes, consistent = {}",
    allocator.free_blocks(),
    allocator.free_bytes(),
    allocator.check_consistency()
  );
  dump(&allocator);
}

fn main() {
  let args: Vec<String> = std::env::args().skip(1).collect();
  let step = args.iter().any(|arg| arg == "--step");
  let sbrk = args.iter().any(|arg| arg == "--sbrk");
  let verbose = args.iter().any(|arg| arg == "--verbose");

  if log::set_logger(&LOGGER).is_ok() {
    log::set_max_level(if verbose {
      LevelFilter::Trace
    } else {
      LevelFilter::Debug
    });
  }

  println!("PID = {}", std::process::id());

  let result = if sbrk {
    // The system allocator may move the break too; that shows up as an error.
    FreeListAllocator::new(ProgramBreak::new()).map(|allocator| run(allocator, step))
  } else {
    ReservedRegion::new(16 << 20)
      .and_then(FreeListAllocator::new)
      .map(|allocator| run(allocator, step))
  };

  if let Err(err) = result {
    eprintln!("cannot set up the arena: {err}");
    std::process::exit(1);
  }

  println!("\nEnd of demo.");
}
