use std::io::Read;

use buddy_allocator::BuddyAllocator;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, or `gdb`, or just visually track allocations as they happen.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() {
  // 64 KiB of caller-owned memory; the allocator never talks to the OS
  // itself, it only ever carves up what it is handed here.
  let mut region = vec![0u8; 64 * 1024];

  let mut allocator =
    unsafe { BuddyAllocator::new(region.as_mut_ptr(), region.len()) }.expect("region too small");

  println!(
    "[start] managing {} logical bytes over a {} byte buffer",
    allocator.capacity(),
    region.len()
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) A small allocation lands on a leaf-sized block.
  // --------------------------------------------------------------------
  let first = allocator.allocate(40).expect("out of memory");
  println!("\n[1] Allocate 40 bytes -> {first:?}");
  unsafe { first.as_ptr().write_bytes(0xAB, 40) };
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) A larger allocation forces a split further up the tree.
  // --------------------------------------------------------------------
  let second = allocator.allocate(3000).expect("out of memory");
  println!("\n[2] Allocate 3000 bytes -> {second:?}");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Releasing the first block and immediately re-requesting the same
  //    size shows the free list handing the exact same address back.
  // --------------------------------------------------------------------
  allocator.deallocate(Some(first));
  println!("\n[3] Deallocated first block at {first:?}");

  let third = allocator.allocate(40).expect("out of memory");
  println!(
    "[3] Re-allocated 40 bytes -> {third:?} (same address? {})",
    third == first
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Releasing both remaining blocks lets their buddies merge back
  //    together; a request for their combined size is satisfied without
  //    forcing a split anywhere else in the tree.
  // --------------------------------------------------------------------
  allocator.deallocate(Some(third));
  allocator.deallocate(Some(second));

  let reunited = allocator.allocate(4096).expect("buddies failed to merge");
  println!("\n[4] After releasing every block, allocate(4096) -> {reunited:?}");

  println!("\n[5] End of demo.");
}
