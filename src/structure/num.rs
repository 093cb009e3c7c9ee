use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Numeric leaf of the structure tree.
///
/// Integers and floats compare by numeric value, so `Int(2)` equals
/// `Float(2.0)` and both hash identically. NaN equals itself and sorts after
/// every other number, which keeps the ordering total.
#[derive(Copy, Clone, Debug)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    /// Integer view of the number, if it has no fractional part and fits.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Num::Int(i) => Some(i),
            Num::Float(f) => exact_i64(f),
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Num::Int(_))
    }

    pub fn is_finite(self) -> bool {
        match self {
            Num::Int(_) => true,
            Num::Float(f) => f.is_finite(),
        }
    }

    pub fn add(self, that: Num) -> Num {
        match (self, that) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            _ => Num::Float(self.as_f64() + that.as_f64()),
        }
    }

    pub fn sub(self, that: Num) -> Num {
        match (self, that) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_sub(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 - b as f64)),
            _ => Num::Float(self.as_f64() - that.as_f64()),
        }
    }

    pub fn mul(self, that: Num) -> Num {
        match (self, that) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 * b as f64)),
            _ => Num::Float(self.as_f64() * that.as_f64()),
        }
    }

    /// Integer division stays integral only when it divides evenly.
    pub fn div(self, that: Num) -> Num {
        match (self, that) {
            (Num::Int(a), Num::Int(b)) if b != 0 && a.checked_rem(b) == Some(0) => {
                a.checked_div(b).map(Num::Int).unwrap_or(Num::Float(a as f64 / b as f64))
            }
            _ => Num::Float(self.as_f64() / that.as_f64()),
        }
    }

    pub fn rem(self, that: Num) -> Num {
        match (self, that) {
            (Num::Int(a), Num::Int(b)) if b != 0 => {
                a.checked_rem(b).map(Num::Int).unwrap_or(Num::Int(0))
            }
            _ => Num::Float(self.as_f64() % that.as_f64()),
        }
    }

    pub fn neg(self) -> Num {
        match self {
            Num::Int(i) => i.checked_neg().map(Num::Int).unwrap_or(Num::Float(-(i as f64))),
            Num::Float(f) => Num::Float(-f),
        }
    }

    pub(crate) fn structural_hash(self) -> u64 {
        match self.as_i64() {
            Some(i) => i as u64,
            None => match self {
                Num::Float(f) if f.is_nan() => 0x7ff8_0000_0000_0000,
                _ => self.as_f64().to_bits(),
            },
        }
    }
}

fn exact_i64(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -9.223_372_036_854_776e18 && f < 9.223_372_036_854_776e18 {
        Some(f as i64)
    } else {
        None
    }
}

/// Exact comparison of an integer against a float; the integer is never
/// rounded through `f64`.
fn cmp_int_f64(a: i64, b: f64) -> Ordering {
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    if b.is_nan() || b >= TWO_63 {
        return Ordering::Less;
    }
    if b < -TWO_63 {
        return Ordering::Greater;
    }
    // in range, so truncation is exact
    let whole = b.trunc() as i64;
    a.cmp(&whole).then_with(|| {
        let fract = b.fract();
        if fract > 0.0 {
            Ordering::Less
        } else if fract < 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Ord for Num {
    fn cmp(&self, other: &Self) -> Ordering {
        match (*self, *other) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (Num::Int(a), Num::Float(b)) => cmp_int_f64(a, b),
            (Num::Float(a), Num::Int(b)) => cmp_int_f64(b, a).reverse(),
            (Num::Float(a), Num::Float(b)) => cmp_f64(a, b),
        }
    }
}

impl PartialOrd for Num {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Num {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Num {}

impl Hash for Num {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(i) => write!(f, "{}", i),
            Num::Float(x) if x.is_nan() => f.write_str("nan"),
            Num::Float(x) if x.is_infinite() => f.write_str(if *x > 0.0 { "inf" } else { "-inf" }),
            // Debug formatting keeps a fractional part or exponent, so the
            // text reads back as a float.
            Num::Float(x) => write!(f, "{:?}", x),
        }
    }
}

macro_rules! num_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Num {
            fn from(n: $t) -> Self {
                Num::Int(n as i64)
            }
        })*
    };
}

num_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Num {
    fn from(n: u64) -> Self {
        i64::try_from(n).map(Num::Int).unwrap_or(Num::Float(n as f64))
    }
}

impl From<f32> for Num {
    fn from(n: f32) -> Self {
        Num::Float(n as f64)
    }
}

impl From<f64> for Num {
    fn from(n: f64) -> Self {
        Num::Float(n)
    }
}
