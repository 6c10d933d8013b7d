use std::rc::Rc;

use crate::readable::ByteView;

/// The chunk-sizing function of a queuing strategy.
pub type SizeAlgorithm<T> = Rc<dyn Fn(&T) -> f64>;

/// https://streams.spec.whatwg.org/#qs
///
/// A missing high-water mark defaults per controller kind (1 for default
/// streams); a missing size algorithm counts every chunk as 1.
pub struct QueuingStrategy<T: 'static> {
    pub high_water_mark: Option<f64>,
    pub size: Option<SizeAlgorithm<T>>,
}

impl<T> Default for QueuingStrategy<T> {
    fn default() -> Self {
        Self {
            high_water_mark: None,
            size: None,
        }
    }
}

impl<T> Clone for QueuingStrategy<T> {
    fn clone(&self) -> Self {
        Self {
            high_water_mark: self.high_water_mark,
            size: self.size.clone(),
        }
    }
}

impl<T> QueuingStrategy<T> {
    /// CountQueuingStrategy({ highWaterMark }).
    pub fn count(high_water_mark: f64) -> Self {
        Self {
            high_water_mark: Some(high_water_mark),
            size: Some(Rc::new(|_: &T| 1.0)),
        }
    }

    pub fn with_high_water_mark(high_water_mark: f64) -> Self {
        Self {
            high_water_mark: Some(high_water_mark),
            size: None,
        }
    }

    pub fn with_size(mut self, size: impl Fn(&T) -> f64 + 'static) -> Self {
        self.size = Some(Rc::new(size));
        self
    }
}

impl QueuingStrategy<ByteView> {
    /// ByteLengthQueuingStrategy({ highWaterMark }).
    pub fn byte_length(high_water_mark: f64) -> Self {
        Self {
            high_water_mark: Some(high_water_mark),
            size: Some(Rc::new(|chunk: &ByteView| chunk.byte_length() as f64)),
        }
    }
}
