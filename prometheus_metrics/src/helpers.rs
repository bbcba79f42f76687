use log::warn;
use prometheus::{Histogram, HistogramTimer, HistogramVec};

pub fn start_timer_vec(histogram_vec: &HistogramVec, label: &str) -> Option<HistogramTimer> {
    match histogram_vec
        .get_metric_with_label_values(&[label])
        .as_ref()
        .map(Histogram::start_timer)
    {
        Ok(timer) => Some(timer),
        Err(error) => {
            warn!("unable to observe {label} metric for histogram_vec ({histogram_vec:?}): {error}");
            None
        }
    }
}
