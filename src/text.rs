//! Text rendering of detection lines.

use std::fmt;
use std::io::{self, Write};

use crate::result::{FrameResult, LidarBox, Scalar};

/// Write `value` as its shortest round-tripping decimal form: `1.0`, `0.87`,
/// `1e+16`, `1.5e-05`, `inf`, `nan`.
pub fn write_float<T>(f: &mut fmt::Formatter<'_>, value: T) -> fmt::Result
where
    T: Copy + Into<f64> + fmt::Debug,
{
    let wide: f64 = value.into();
    if wide.is_nan() {
        return f.write_str("nan");
    }
    if wide.is_infinite() {
        return f.write_str(if wide > 0.0 { "inf" } else { "-inf" });
    }
    // `{:?}` already yields the shortest repr with a trailing `.0` and switches
    // to scientific notation outside [1e-4, 1e16); only the exponent differs.
    let repr = format!("{value:?}");
    match repr.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            write!(f, "{mantissa}e{sign}{digits:0>2}")
        }
        None => f.write_str(&repr),
    }
}

/// One output line, without the trailing newline.
pub fn detection_line(b: &LidarBox, score: Scalar) -> String {
    let [x, y, z, length, width, height, rotation] = b.values();
    format!("{x} {y} {z} {length} {width} {height} {rotation} {score}")
}

/// Write every detection of `frame` as one line each; returns the line count.
pub fn write_frame<W: Write>(out: &mut W, frame: &FrameResult) -> io::Result<usize> {
    let mut lines = 0;
    for (j, (b, score)) in frame.detections().enumerate() {
        writeln!(out, "{}", detection_line(b, score))?;
        log::trace!("wrote box {} for frame {}", j, frame.frame_id);
        lines += 1;
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::FrameId;

    fn render(value: f64) -> String {
        Scalar::Float(value).to_string()
    }

    #[test]
    fn floats_render_like_their_literal() {
        assert_eq!(render(1.0), "1.0");
        assert_eq!(render(0.1), "0.1");
        assert_eq!(render(0.87), "0.87");
        assert_eq!(render(-0.0), "-0.0");
        assert_eq!(render(-1.5707963267948966), "-1.5707963267948966");
        assert_eq!(render(123456.789), "123456.789");
    }

    #[test]
    fn extreme_magnitudes_use_signed_exponent() {
        assert_eq!(render(1e16), "1e+16");
        assert_eq!(render(1.5e-5), "1.5e-05");
        assert_eq!(render(2.5e-120), "2.5e-120");
        assert_eq!(render(0.0001), "0.0001");
    }

    #[test]
    fn non_finite_values() {
        assert_eq!(render(f64::INFINITY), "inf");
        assert_eq!(render(f64::NEG_INFINITY), "-inf");
        assert_eq!(render(f64::NAN), "nan");
    }

    #[test]
    fn integers_keep_integer_form() {
        assert_eq!(Scalar::Int(3).to_string(), "3");
    }

    #[test]
    fn line_has_eight_fields_in_order() {
        let b = LidarBox::from([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.1]);
        assert_eq!(
            detection_line(&b, Scalar::Float(0.87)),
            "1.0 2.0 3.0 4.0 5.0 6.0 0.1 0.87"
        );
    }

    #[test]
    fn frame_lines_parse_back() -> io::Result<()> {
        let frame = FrameResult {
            frame_id: FrameId::from("000010"),
            boxes: vec![
                LidarBox::from([10.25, -3.5, -0.75, 3.9, 1.6, 1.56, 1.5707963267948966]),
                LidarBox::from([1e-5, 2e17, 0.0, 0.5, 0.5, 1.8, -3.14159]),
            ],
            scores: vec![Scalar::Float(0.9731), Scalar::Float(0.125)],
        };
        let mut buf = Vec::new();
        assert_eq!(write_frame(&mut buf, &frame)?, 2);

        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.ends_with('\n'));
        for (line, (b, score)) in text.lines().zip(frame.detections()) {
            let parsed: Vec<f64> = line
                .split_whitespace()
                .map(|field| field.parse().expect("number"))
                .collect();
            let mut expected: Vec<f64> = b.values().iter().map(|v| v.as_f64()).collect();
            expected.push(score.as_f64());
            assert_eq!(parsed, expected);
        }
        Ok(())
    }
}
