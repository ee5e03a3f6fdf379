//! 几何解析
//! Textual point-list parsing: `"(x,y),(x,y),..."` → `Vec<Point>`

use super::types::Point;
use crate::error::{Result, TrackerError};

/// 解析点列表, 任一坐标不是浮点数即失败
pub fn parse_geometry(raw_geometry: &str) -> Result<Vec<Point>> {
    raw_geometry
        .split("),(")
        .map(|raw_xy| {
            let raw_xy = raw_xy.replace(['(', ')'], "");
            let parts: Vec<&str> = raw_xy.trim().split(',').collect();

            let x = parse_coordinate(&parts, 0)?;
            let y = parse_coordinate(&parts, 1)?;

            Ok(Point::new(x, y))
        })
        .collect()
}

fn parse_coordinate(parts: &[&str], index: usize) -> Result<f64> {
    let raw = parts.get(index).ok_or_else(|| {
        TrackerError::Parse(format!("missing coordinate {:?}[{}]", parts, index))
    })?;

    raw.trim()
        .parse::<f64>()
        .map_err(|_| TrackerError::Parse(format!("failed to parse {:?}[{}] as float", parts, index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_points() {
        let points = parse_geometry("(1,2),(3,4)").unwrap();
        assert_eq!(points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
    }

    #[test]
    fn test_parse_bounding_box() {
        let points = parse_geometry("(10.5,20),(30,20),(30,60.25),(10.5,60.25)").unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points[2], Point::new(30.0, 60.25));
    }

    #[test]
    fn test_parse_single_point() {
        assert_eq!(parse_geometry("(640,360)").unwrap(), vec![Point::new(640.0, 360.0)]);
    }

    #[test]
    fn test_non_numeric_coordinate() {
        assert!(matches!(parse_geometry("(a,2)"), Err(TrackerError::Parse(_))));
        assert!(matches!(parse_geometry("(1,2),(3,b)"), Err(TrackerError::Parse(_))));
    }

    #[test]
    fn test_missing_coordinate() {
        assert!(matches!(parse_geometry("(1)"), Err(TrackerError::Parse(_))));
        assert!(matches!(parse_geometry(""), Err(TrackerError::Parse(_))));
    }
}
