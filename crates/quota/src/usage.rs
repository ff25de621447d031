use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Bytes an origin occupies on disk, split into two buckets.
///
/// Values only ever grow through addition, which saturates instead of
/// wrapping: a corrupt size somewhere in a walk must not turn into a tiny
/// total.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageInfo {
    database: u64,
    file: u64,
}

impl UsageInfo {
    pub const fn new(database: u64, file: u64) -> Self {
        Self { database, file }
    }

    /// Usage counted entirely as database usage.
    pub const fn from_database(bytes: u64) -> Self {
        Self::new(bytes, 0)
    }

    /// Usage counted entirely as file usage.
    pub const fn from_file(bytes: u64) -> Self {
        Self::new(0, bytes)
    }

    pub const fn database_usage(&self) -> u64 {
        self.database
    }

    pub const fn file_usage(&self) -> u64 {
        self.file
    }

    pub const fn total(&self) -> u64 {
        self.database.saturating_add(self.file)
    }

    pub const fn is_zero(&self) -> bool {
        self.database == 0 && self.file == 0
    }
}

impl Add for UsageInfo {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            database: self.database.saturating_add(rhs.database),
            file: self.file.saturating_add(rhs.file),
        }
    }
}

impl AddAssign for UsageInfo {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for UsageInfo {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
