use crate::error::{MsaError, Result};
use std::fmt;

/// Half-open strided index range `start, start + stride, … < stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingRange {
    pub start: usize,
    pub stride: usize,
    pub stop: usize,
}

impl SamplingRange {
    /// Resolves a `<start>,<stride>[,<stop>]` or `<stride>` spec against a
    /// stack of `total` images. A third value `<= 0` counts back from the end.
    pub fn resolve(spec: &str, total: usize) -> Result<Self> {
        let values = spec
            .split(',')
            .map(|token| {
                token.trim().parse::<i64>().map_err(|_| {
                    MsaError::range_spec(spec, format!("'{}' is not an integer", token.trim()))
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let total_i = total as i64;
        let (start, stride, stop) = match values.as_slice() {
            [stride] => (0, *stride, total_i),
            [start, stride] => (*start, *stride, total_i),
            [start, stride, stop] if *stop <= 0 => (*start, *stride, total_i + *stop),
            [start, stride, stop] => (*start, *stride, *stop),
            _ => {
                return Err(MsaError::range_spec(
                    spec,
                    format!("expected 1 to 3 comma separated values, got {}", values.len()),
                ));
            }
        };

        if stride < 1 {
            return Err(MsaError::range_spec(spec, "stride must be at least 1"));
        }
        if start < 0 {
            return Err(MsaError::range_spec(spec, "start must not be negative"));
        }
        if stop <= start {
            return Err(MsaError::range_spec(
                spec,
                format!("resolved stop {} must be greater than start {}", stop, start),
            ));
        }
        if stop > total_i {
            return Err(MsaError::range_spec(
                spec,
                format!("stop {} exceeds the stack size {}", stop, total),
            ));
        }

        Ok(Self {
            start: start as usize,
            stride: stride as usize,
            stop: stop as usize,
        })
    }

    /// Every image of `[0, total)`.
    pub fn full(total: usize) -> Self {
        Self {
            start: 0,
            stride: 1,
            stop: total,
        }
    }

    /// Number of selected indices, `ceil((stop - start) / stride)`.
    pub fn count(&self) -> usize {
        if self.stop <= self.start {
            return 0;
        }
        (self.stop - self.start).div_ceil(self.stride)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (self.start..self.stop).step_by(self.stride.max(1))
    }
}

impl fmt::Display for SamplingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.start, self.stride, self.stop)
    }
}
