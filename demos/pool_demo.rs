use std::{fs::File, io::Write, ptr::NonNull};

use rpool::{PoolAllocator, RegionPool};

/// Resources owned through a large region allocation and released by
/// cleanup handlers when the pool goes away.
struct Resources {
  greeting: *mut String,
  file: *mut File,
}

fn region_demo() {
  let mut pool = RegionPool::new(512);
  if !pool.is_valid() {
    println!("region pool creation failed");
    return;
  }
  println!("pool created, small requests up to {} bytes", pool.max_small());

  // 128 <= max_small, so this comes out of the pool's first block.
  let small = match pool.alloc_zeroed(128) {
    Ok(ptr) => ptr,
    Err(err) => {
      println!("alloc_zeroed(128) failed: {err}");
      return;
    }
  };
  println!("small allocation at {small:p}, owned by a block: {}", pool.owns_small(small));

  // 512 > max_small, so this one is malloc'd and tracked in the large list.
  let large = match pool.alloc(512) {
    Ok(ptr) => ptr.cast::<Resources>(),
    Err(err) => {
      println!("alloc(512) failed: {err}");
      return;
    }
  };
  println!("large allocation at {large:p}, tracked: {}", pool.owns_large(large.cast()));

  let path = std::env::temp_dir().join("rpool-demo.txt");
  let mut file = match File::create(&path) {
    Ok(file) => file,
    Err(err) => {
      println!("could not create {}: {err}", path.display());
      return;
    }
  };
  let _ = writeln!(file, "written through a pool-tracked handle");

  unsafe {
    large.write(Resources {
      greeting: Box::into_raw(Box::new(String::from("hello world"))),
      file: Box::into_raw(Box::new(file)),
    });
  }
  let resources = unsafe { large.as_ref() };

  match pool.cleanup_add(0) {
    Ok(cleanup) => {
      cleanup.set_data(NonNull::new(resources.greeting.cast()));
      cleanup.set_handler(|data| {
        if let Some(ptr) = data {
          let greeting = unsafe { Box::from_raw(ptr.cast::<String>().as_ptr()) };
          println!("freeing \"{greeting}\"");
        }
      });
    }
    Err(err) => println!("cleanup_add failed: {err}"),
  }

  match pool.cleanup_add(0) {
    Ok(cleanup) => {
      cleanup.set_data(NonNull::new(resources.file.cast()));
      cleanup.set_handler(|data| {
        if let Some(ptr) = data {
          drop(unsafe { Box::from_raw(ptr.cast::<File>().as_ptr()) });
          println!("closed file");
        }
      });
    }
    Err(err) => println!("cleanup_add failed: {err}"),
  }

  println!("{:?}", pool.stats());
  println!("dropping the pool runs the cleanups, newest first");
}

fn free_list_demo() {
  let alloc = PoolAllocator::<i32>::new();
  let mut cap = 0;
  let mut len = 0;
  let mut ptr = NonNull::dangling();

  for value in 0..20 {
    if len == cap {
      let new_cap = (cap * 2).max(1);
      ptr = match unsafe { alloc.reallocate(ptr, cap, new_cap) } {
        Ok(ptr) => ptr,
        Err(err) => {
          println!("reallocate to {new_cap} ints failed: {err}");
          return;
        }
      };
      cap = new_cap;
    }
    unsafe { alloc.construct(ptr.add(len), value) };
    len += 1;
  }

  let values: Vec<String> = (0..len)
    .map(|i| unsafe { *ptr.add(i).as_ptr() }.to_string())
    .collect();
  println!("{}", values.join(" "));
  println!("{:?}", rpool::FreeListPool::global().stats());

  unsafe { alloc.deallocate(ptr, cap) };
}

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

  region_demo();
  println!("--------------------------");
  free_list_demo();
}
