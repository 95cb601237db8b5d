//! The adapter installed as the process-wide allocator.

use std::collections::{BTreeMap, HashMap};

use tagalloc::GlobalFreeList;

#[global_allocator]
static ALLOCATOR: GlobalFreeList = GlobalFreeList::new();

#[test]
fn test_strings_and_hash_map() {
  let strings: Vec<String> = (0..1000).map(|i| format!("entry {i}")).collect();
  assert_eq!(strings.len(), 1000);
  assert_eq!(strings[999], "entry 999");

  let map: HashMap<u64, u64> = (0..1000).map(|i| (i, i * i)).collect();
  assert_eq!(map.len(), 1000);
  assert_eq!(map[&31], 961);

  let by_name: HashMap<&str, usize> = strings
    .iter()
    .enumerate()
    .map(|(i, s)| (s.as_str(), i))
    .collect();
  assert_eq!(by_name["entry 500"], 500);
}

#[test]
fn test_u128_and_collections() {
  let wide: Vec<u128> = (0..512).map(|i| u128::MAX - i).collect();
  assert_eq!(wide.as_ptr().addr() % align_of::<u128>(), 0);
  assert_eq!(wide[511], u128::MAX - 511);

  let mut tree = BTreeMap::new();
  for i in 0..2000u32 {
    tree.insert(i, vec![i; (i % 17) as usize]);
  }
  tree.retain(|k, _| k % 3 == 0);
  assert_eq!(tree.len(), 667);

  let boxed: Box<[u8]> = vec![7u8; 1 << 16].into_boxed_slice();
  assert!(boxed.iter().all(|&b| b == 7));
}
