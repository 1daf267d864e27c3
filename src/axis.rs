//! Axis scaling ("niceNum"): picks a human-friendly min/max/tick for a
//! chart axis given the data's observed range, so the renderer never has to
//! guess at gridlines from raw floating-point extrema.

/// A snapped axis range with 5 tick intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub min: f64,
    pub max: f64,
    pub tick: f64,
}

const INTERVALS: f64 = 5.0;
const EDGE_THRESHOLD: f64 = 0.10;

/// Computes a nice axis scale covering `[data_min, data_max]`.
///
/// 1. `range = niceNum(max-min, round=false)`, `tick = niceNum(range/5, round=true)`.
/// 2. Snap: `axisMin = floor(dataMin/tick)*tick`, `axisMax = ceil(dataMax/tick)*tick`.
/// 3. If data touches an edge closer than 10% of one tick interval, expand
///    that edge by one more tick.
pub fn compute_scale(data_min: f64, data_max: f64) -> AxisScale {
    if data_min == data_max {
        // A flat series still needs a non-degenerate axis.
        return compute_scale(data_min - 1.0, data_max + 1.0);
    }

    let range = nice_num(data_max - data_min, false);
    let tick = nice_num(range / INTERVALS, true);

    let mut min = (data_min / tick).floor() * tick;
    let mut max = (data_max / tick).ceil() * tick;

    if (data_min - min) < EDGE_THRESHOLD * tick {
        min -= tick;
    }
    if (max - data_max) < EDGE_THRESHOLD * tick {
        max += tick;
    }

    AxisScale { min, max, tick }
}

/// `niceNum(v, round)`: picks a "nice" fraction from `{1,2,5,10}` scaled to
/// `v`'s order of magnitude. `round=false` always rounds up (used for the
/// overall range); `round=true` rounds to the nearest of `{1,2,5,10}` with
/// thresholds `{1.5,3,7}` (used for the tick size).
pub fn nice_num(v: f64, round: bool) -> f64 {
    if v <= 0.0 {
        return 0.0;
    }
    let exponent = v.log10().floor();
    let fraction = v / 10f64.powf(exponent);

    let nice_fraction = if round {
        if fraction < 1.5 {
            1.0
        } else if fraction < 3.0 {
            2.0
        } else if fraction < 7.0 {
            5.0
        } else {
            10.0
        }
    } else if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };

    nice_fraction * 10f64.powf(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_num_rounds_up_for_range() {
        assert_eq!(nice_num(83.0, false), 100.0);
        assert_eq!(nice_num(14.0, false), 20.0);
    }

    #[test]
    fn nice_num_rounds_nearest_for_tick() {
        assert_eq!(nice_num(1.4, true), 1.0);
        assert_eq!(nice_num(2.9, true), 2.0);
        assert_eq!(nice_num(6.9, true), 5.0);
    }

    #[test]
    fn compute_scale_snaps_to_five_ticks() {
        let scale = compute_scale(12.0, 87.0);
        assert!(scale.min <= 12.0);
        assert!(scale.max >= 87.0);
        let intervals = (scale.max - scale.min) / scale.tick;
        assert!((intervals - intervals.round()).abs() < 1e-9);
    }

    #[test]
    fn compute_scale_expands_edge_when_data_sits_close_to_it() {
        // tick will be 20; data_min=1 is within 10% of tick (2.0) of the
        // floor snap (0), so the lower edge should expand by one more tick.
        let scale = compute_scale(1.0, 83.0);
        assert!(scale.min <= -scale.tick + 1e-9 || scale.min <= 0.0);
    }

    #[test]
    fn degenerate_range_still_produces_a_scale() {
        let scale = compute_scale(5.0, 5.0);
        assert!(scale.max > scale.min);
    }
}
