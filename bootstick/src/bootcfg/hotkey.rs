//! Menu accelerator allocation.

/// Keys GRUB binds in the menu itself: `c` opens the command line, `e`
/// edits the highlighted entry.
pub const RESERVED_HOTKEYS: &[char] = &['c', 'e'];

/// Allocation order for entry accelerators.
const HOTKEY_POOL: &str = "abdfghijklmnopqrstuvwxyz123456789";

pub fn is_assignable(key: char) -> bool {
    HOTKEY_POOL.contains(key) && !RESERVED_HOTKEYS.contains(&key)
}

/// Hands out unused accelerators in a fixed order.
#[derive(Debug, Clone)]
pub struct HotkeyAllocator {
    used: Vec<char>,
}

impl HotkeyAllocator {
    /// Start with `used` already taken (e.g. by manifest entries).
    pub fn new(used: impl IntoIterator<Item = char>) -> Self {
        Self {
            used: used.into_iter().collect(),
        }
    }

    /// Next free accelerator, `None` once the pool is exhausted.
    pub fn next_key(&mut self) -> Option<char> {
        let key = HOTKEY_POOL.chars().find(|c| !self.used.contains(c))?;
        self.used.push(key);
        Some(key)
    }
}
