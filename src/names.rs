// Name and sequence generators used for macro expansion and supervisor IDs

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Dapper", "Eager", "Fancy", "Gentle", "Happy", "Icy", "Jolly",
    "Keen", "Lucky", "Mellow", "Nimble", "Odd", "Proud", "Quiet", "Rapid", "Shiny", "Tidy",
    "Upbeat", "Vivid", "Witty", "Young", "Zesty",
];

const ANIMALS: &[&str] = &[
    "Albatross", "Badger", "Cheetah", "Dingo", "Egret", "Ferret", "Gecko", "Heron", "Ibis",
    "Jackal", "Koala", "Lemur", "Marmot", "Newt", "Otter", "Puffin", "Quokka", "Raven",
    "Stoat", "Tapir", "Urchin", "Vole", "Walrus", "Yak", "Zebra",
];

/// Produces a human-readable display name per run. Uniqueness is not required.
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// "Adjective Animal" names picked at random
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Plain");
        let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Head");
        format!("{} {}", adjective, animal)
    }
}

/// Always returns the same name
#[derive(Debug, Clone)]
pub struct FixedName(pub String);

impl NameGenerator for FixedName {
    fn generate(&self) -> String {
        self.0.clone()
    }
}

/// Lowercase ASCII alphanumeric form of a display name, for use in macros
pub fn short_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Produces the next ID as text. May be shared by many supervisors.
pub trait SequenceGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Monotonic decimal sequence. `Sequence::new(n)` yields `n+1`, `n+2`, ...
#[derive(Debug, Default)]
pub struct Sequence {
    current: AtomicU64,
}

impl Sequence {
    pub fn new(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Advance and return the next value
    pub fn next_value(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

impl SequenceGenerator for Sequence {
    fn next_id(&self) -> String {
        self.next_value().to_string()
    }
}

/// Sequence rendered as opaque, fixed-minimum-width base-36 IDs
///
/// Values are scrambled with an invertible 64-bit mix, so IDs are unique per
/// sequence but do not reveal their ordering at a glance.
#[derive(Debug)]
pub struct HashIdSequence {
    inner: Sequence,
    min_len: usize,
}

impl HashIdSequence {
    pub fn new(start: u64, min_len: usize) -> Self {
        Self {
            inner: Sequence::new(start),
            min_len,
        }
    }
}

impl SequenceGenerator for HashIdSequence {
    fn next_id(&self) -> String {
        let encoded = base36(mix(self.inner.next_value()));
        if encoded.len() >= self.min_len {
            encoded
        } else {
            format!("{}{}", "0".repeat(self.min_len - encoded.len()), encoded)
        }
    }
}

// splitmix64 finalizer; a bijection on u64
fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn base36(mut x: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if x == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while x > 0 {
        out.push(DIGITS[(x % 36) as usize]);
        x /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
