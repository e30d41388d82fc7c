use crate::signals::MetricResult;

/// One bar of the waterfall: the running total immediately before and
/// after one signal's delta was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: &'static str,
    pub start: f64,
    pub end: f64,
    pub positive: bool,
}

/// Laid-out chart. The axis always spans zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waterfall {
    pub segments: Vec<Segment>,
    pub min: f64,
    pub max: f64,
}

/// Lay out segments from the ordered result sequence alone. Pure, so the
/// chart can be redrawn idempotently after every arrival.
pub fn layout(results: &[MetricResult]) -> Waterfall {
    let mut running = 0.0;
    let mut min = 0.0f64;
    let mut max = 0.0f64;
    let segments = results
        .iter()
        .map(|result| {
            let start = running;
            running += result.delta;
            min = min.min(running);
            max = max.max(running);
            Segment {
                name: result.name,
                start,
                end: running,
                positive: result.delta >= 0.0,
            }
        })
        .collect();
    Waterfall { segments, min, max }
}

/// Render the chart as text, one bar per line plus an axis footer.
/// Positive bars are solid, negative bars hatched; zero-width segments get
/// a tick mark at their position.
pub fn render(chart: &Waterfall, width: usize) -> String {
    if chart.segments.is_empty() {
        return String::new();
    }

    let width = width.max(10);
    let span = chart.max - chart.min;
    let span = if span == 0.0 { 1.0 } else { span };
    let col = |value: f64| -> usize {
        let c = ((value - chart.min) / span * (width - 1) as f64).round();
        (c as usize).min(width - 1)
    };
    let zero = col(0.0);

    let mut out = String::new();
    for segment in &chart.segments {
        let mut line = vec![' '; width];
        line[zero] = '|';
        let (lo, hi) = if segment.start <= segment.end {
            (col(segment.start), col(segment.end))
        } else {
            (col(segment.end), col(segment.start))
        };
        if lo == hi {
            line[lo] = '·';
        } else {
            let fill = if segment.positive { '█' } else { '░' };
            for cell in line.iter_mut().take(hi).skip(lo) {
                *cell = fill;
            }
        }
        let bar: String = line.into_iter().collect();
        out.push_str(&format!(
            "{:>13}  {bar}  {:+9.2}\n",
            segment.name,
            segment.end - segment.start
        ));
    }

    let min_label = format!("{:.0}", chart.min);
    let max_label = format!("{:.0}", chart.max);
    let gap = width.saturating_sub(min_label.len() + max_label.len());
    out.push_str(&format!(
        "{:>13}  {min_label}{}{max_label}\n",
        "",
        " ".repeat(gap)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::MetricValue;

    fn result(name: &'static str, delta: f64) -> MetricResult {
        MetricResult {
            name,
            value: MetricValue::Count(0),
            delta,
            formatted: String::new(),
        }
    }

    #[test]
    fn segments_chain_running_totals() {
        let chart = layout(&[result("A", 10.0), result("B", -4.0), result("C", 2.0)]);
        assert_eq!(chart.segments.len(), 3);
        assert_eq!((chart.segments[0].start, chart.segments[0].end), (0.0, 10.0));
        assert_eq!((chart.segments[1].start, chart.segments[1].end), (10.0, 6.0));
        assert_eq!((chart.segments[2].start, chart.segments[2].end), (6.0, 8.0));
        assert!(chart.segments[0].positive);
        assert!(!chart.segments[1].positive);
    }

    #[test]
    fn axis_always_includes_zero() {
        let positive = layout(&[result("A", 50.0), result("B", 20.0)]);
        assert_eq!(positive.min, 0.0);
        assert_eq!(positive.max, 70.0);

        let negative = layout(&[result("A", -30.0)]);
        assert_eq!(negative.min, -30.0);
        assert_eq!(negative.max, 0.0);
    }

    #[test]
    fn axis_spans_extreme_partial_totals_not_final() {
        // Running totals: 100, -50, 25 → axis must reach both 100 and -50.
        let chart = layout(&[result("A", 100.0), result("B", -150.0), result("C", 75.0)]);
        assert_eq!(chart.min, -50.0);
        assert_eq!(chart.max, 100.0);
    }

    #[test]
    fn zero_delta_segment_is_zero_width_and_renders() {
        let chart = layout(&[result("A", 10.0), result("B", 0.0)]);
        let seg = &chart.segments[1];
        assert_eq!(seg.start, seg.end);
        let text = render(&chart, 40);
        assert_eq!(text.lines().count(), 3); // two bars + axis
        assert!(text.contains('·'));
    }

    #[test]
    fn all_zero_deltas_do_not_crash_layout() {
        let chart = layout(&[result("A", 0.0), result("B", 0.0)]);
        let text = render(&chart, 40);
        assert!(!text.is_empty());
    }

    #[test]
    fn empty_chart_renders_nothing() {
        assert_eq!(render(&layout(&[]), 40), "");
    }

    #[test]
    fn bars_are_sign_coded() {
        let chart = layout(&[result("Up", 60.0), result("Down", -30.0)]);
        let text = render(&chart, 40);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains('█'));
        assert!(lines[1].contains('░'));
    }
}
