use std::error::Error;

use slabarena::{Allocator, Config, Kernel, Protection};

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    let mut allocator = Allocator::with_config(Kernel::default(), config)?;

    println!(
        "page size {} bytes, cutoff {} bytes, {} byte classes",
        allocator.arena().page_size(),
        config.cutoff,
        config.alignment
    );

    for size in [1, 12, 100, 3999, config.cutoff, 64 * 1024] {
        println!("{size:>6} bytes -> {:?}", allocator.size_class(size));
    }

    let small: Vec<_> = (0..1000)
        .map(|_| allocator.alloc(24))
        .collect::<Result<_, _>>()?;
    let large = allocator.alloc(3 * config.cutoff)?;
    println!("after alloc: {:#?}", allocator.stats());

    unsafe {
        let grown = allocator.realloc(3 * config.cutoff, large, 6 * config.cutoff)?;
        allocator.protect(6 * config.cutoff, grown, Protection::ReadOnly);
        allocator.protect(6 * config.cutoff, grown, Protection::ReadWrite);
        allocator.free(6 * config.cutoff, grown);

        for block in small {
            allocator.free(24, block);
        }
    }

    let released = allocator.compact_all();
    println!("compaction released {released} frames: {:#?}", allocator.stats());

    Ok(())
}
