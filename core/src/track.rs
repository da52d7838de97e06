//! Platform track geolocation.
//!
//! A track assigns longitude and latitude to profile times. Between
//! waypoints the position is interpolated linearly (shortest arc in
//! longitude) unless the waypoints are separated by more than the gap
//! threshold or belong to different segments, in which case the position
//! is undefined rather than extrapolated.

use std::path::PathBuf;

use crate::io::dataset_file::DatasetFile;
use crate::prelude::{StageError, StageResult};

/// One track file's worth of waypoints.
#[derive(Debug, Clone)]
pub struct TrackPart {
    pub time: Vec<f64>,
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    pub bnds: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone)]
pub struct Track {
    time: Vec<f64>,
    lon: Vec<f64>,
    lat: Vec<f64>,
    bnds: Option<Vec<[f64; 2]>>,
    segment: Vec<usize>,
    gap: f64,
}

fn interp_lon(l0: f64, l1: f64, w: f64) -> f64 {
    let mut dl = l1 - l0;
    if dl > 180.0 {
        dl -= 360.0;
    } else if dl < -180.0 {
        dl += 360.0;
    }
    let mut l = l0 + dl * w;
    if l < 0.0 {
        l += 360.0;
    } else if l >= 360.0 {
        l -= 360.0;
    }
    l
}

impl Track {
    /// Joins track parts into one track. Adjacent parts without time
    /// bounds form a continuous segment only when the last time of one
    /// equals the first time of the next; otherwise each part is an
    /// independent segment. `gap` is in days; 0 disables the gap rule.
    pub fn new(parts: Vec<TrackPart>, gap: f64) -> StageResult<Track> {
        if parts.is_empty() {
            return Err(StageError::InvalidInput("empty track".into()));
        }
        let has_bnds = parts[0].bnds.is_some();
        if parts.iter().any(|p| p.bnds.is_some() != has_bnds) {
            return Err(StageError::InvalidInput(
                "track files disagree on time_bnds".into(),
            ));
        }
        let mut track = Track {
            time: Vec::new(),
            lon: Vec::new(),
            lat: Vec::new(),
            bnds: if has_bnds { Some(Vec::new()) } else { None },
            segment: Vec::new(),
            gap,
        };
        let mut seg = 0usize;
        for part in parts {
            let n = part.time.len();
            if part.lon.len() != n || part.lat.len() != n || n == 0 {
                return Err(StageError::InvalidInput("malformed track file".into()));
            }
            for i in 0..n {
                if !(0.0..360.0).contains(&part.lon[i]) || !(-90.0..=90.0).contains(&part.lat[i]) {
                    return Err(StageError::InvalidInput(format!(
                        "track position ({}, {}) out of range",
                        part.lon[i], part.lat[i]
                    )));
                }
                if i > 0 && part.time[i] <= part.time[i - 1] {
                    return Err(StageError::InvalidInput(
                        "track time not strictly increasing".into(),
                    ));
                }
            }
            let mut start = 0usize;
            if let Some(&last) = track.time.last() {
                if part.time[0] < last {
                    return Err(StageError::InvalidInput(
                        "track files out of chronological order".into(),
                    ));
                }
                if !has_bnds {
                    if part.time[0] == last {
                        start = 1; // continuous with the previous part
                    } else {
                        seg += 1;
                    }
                }
            }
            track.time.extend_from_slice(&part.time[start..]);
            track.lon.extend_from_slice(&part.lon[start..]);
            track.lat.extend_from_slice(&part.lat[start..]);
            track.segment.extend(std::iter::repeat(seg).take(n - start));
            if let (Some(all), Some(bnds)) = (track.bnds.as_mut(), part.bnds.as_ref()) {
                if bnds.len() != n {
                    return Err(StageError::InvalidInput("malformed track file".into()));
                }
                all.extend_from_slice(&bnds[start..]);
            }
        }
        Ok(track)
    }

    /// Position at time `t`; `(NaN, NaN)` when undefined.
    pub fn locate(&self, t: f64) -> (f64, f64) {
        const UNDEFINED: (f64, f64) = (f64::NAN, f64::NAN);
        let n = self.time.len();
        if let Some(bnds) = &self.bnds {
            let i = match bnds
                .iter()
                .position(|b| b[0] <= t && t <= b[1]) {
                Some(i) => i,
                None => return UNDEFINED,
            };
            if t >= self.time[i] {
                if i + 1 < n && bnds[i][1] == bnds[i + 1][0] {
                    return self.interp(i, i + 1, t);
                }
            } else if i > 0 && bnds[i - 1][1] == bnds[i][0] {
                return self.interp(i - 1, i, t);
            }
            return (self.lon[i], self.lat[i]);
        }
        if n == 0 || t < self.time[0] || t > self.time[n - 1] {
            return UNDEFINED;
        }
        let j = match self.time.binary_search_by(|v| v.total_cmp(&t)) {
            Ok(j) => return (self.lon[j], self.lat[j]),
            Err(j) => j,
        };
        // t lies strictly between points j - 1 and j
        if self.segment[j - 1] != self.segment[j] {
            return UNDEFINED;
        }
        if self.gap > 0.0 && self.time[j] - self.time[j - 1] > self.gap {
            return UNDEFINED;
        }
        self.interp(j - 1, j, t)
    }

    fn interp(&self, a: usize, b: usize, t: f64) -> (f64, f64) {
        let span = self.time[b] - self.time[a];
        let w = if span > 0.0 {
            (t - self.time[a]) / span
        } else {
            0.0
        };
        (
            interp_lon(self.lon[a], self.lon[b], w),
            self.lat[a] + (self.lat[b] - self.lat[a]) * w,
        )
    }
}

/// Reads one or more track files and joins them into a single track.
pub fn read_track(paths: &[PathBuf], gap: f64) -> StageResult<Track> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let ds = DatasetFile::read(path)?;
        let time = ds.require_1d("time")?;
        let lon = ds.require_1d("lon")?;
        let lat = ds.require_1d("lat")?;
        let bnds = match ds.vars.get("time_bnds") {
            Some(var) => {
                if var.data.len() != time.len() * 2 {
                    return Err(StageError::InvalidInput(format!(
                        "{}: malformed time_bnds",
                        path.display()
                    )));
                }
                Some(
                    var.data
                        .chunks(2)
                        .map(|b| [b[0].unwrap_or(f64::NAN), b[1].unwrap_or(f64::NAN)])
                        .collect(),
                )
            }
            None => None,
        };
        parts.push(TrackPart {
            time,
            lon,
            lat,
            bnds,
        });
    }
    Track::new(parts, gap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(time: &[f64], lon: &[f64], lat: &[f64]) -> TrackPart {
        TrackPart {
            time: time.to_vec(),
            lon: lon.to_vec(),
            lat: lat.to_vec(),
            bnds: None,
        }
    }

    #[test]
    fn locate_interpolates_between_waypoints() {
        let track = Track::new(
            vec![part(&[0.0, 1.0], &[10.0, 20.0], &[-40.0, -50.0])],
            0.5,
        )
        .unwrap();
        let (lon, lat) = track.locate(0.5);
        assert!((lon - 15.0).abs() < 1e-12);
        assert!((lat + 45.0).abs() < 1e-12);
    }

    #[test]
    fn gaps_beyond_threshold_are_undefined() {
        // 2 day separation exceeds the 0.5 day gap threshold
        let track = Track::new(
            vec![part(&[0.0, 2.0], &[10.0, 20.0], &[-40.0, -50.0])],
            0.5,
        )
        .unwrap();
        let (lon, lat) = track.locate(1.0);
        assert!(lon.is_nan());
        assert!(lat.is_nan());
    }

    #[test]
    fn no_extrapolation_beyond_track_ends() {
        let track = Track::new(vec![part(&[1.0, 2.0], &[10.0, 20.0], &[0.0, 0.0])], 0.0).unwrap();
        assert!(track.locate(0.5).0.is_nan());
        assert!(track.locate(2.5).0.is_nan());
        assert_eq!(track.locate(1.0).0, 10.0);
    }

    #[test]
    fn adjacent_files_join_only_when_times_touch() {
        let joined = Track::new(
            vec![
                part(&[0.0, 1.0], &[10.0, 20.0], &[0.0, 0.0]),
                part(&[1.0, 2.0], &[20.0, 30.0], &[0.0, 0.0]),
            ],
            10.0,
        )
        .unwrap();
        assert!((joined.locate(1.5).0 - 25.0).abs() < 1e-12);

        let split = Track::new(
            vec![
                part(&[0.0, 1.0], &[10.0, 20.0], &[0.0, 0.0]),
                part(&[1.25, 2.0], &[20.0, 30.0], &[0.0, 0.0]),
            ],
            10.0,
        )
        .unwrap();
        assert!(split.locate(1.1).0.is_nan());
    }

    #[test]
    fn longitude_interpolates_along_the_shortest_arc() {
        let track = Track::new(
            vec![part(&[0.0, 1.0], &[350.0, 10.0], &[0.0, 0.0])],
            0.0,
        )
        .unwrap();
        let (lon, _) = track.locate(0.5);
        assert!((lon - 0.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_define_segment_continuity() {
        let track = Track::new(
            vec![TrackPart {
                time: vec![0.5, 1.5, 3.5],
                lon: vec![10.0, 20.0, 30.0],
                lat: vec![0.0, 0.0, 0.0],
                bnds: Some(vec![[0.0, 1.0], [1.0, 2.0], [3.0, 4.0]]),
            }],
            0.0,
        )
        .unwrap();
        // points 0 and 1 share a bound edge: interpolated
        assert!((track.locate(1.0).0 - 15.0).abs() < 1e-12);
        // point 2 is a detached segment: clamped, not interpolated
        assert_eq!(track.locate(3.5).0, 30.0);
        // outside all bounds: undefined
        assert!(track.locate(2.5).0.is_nan());
    }

    #[test]
    fn rejects_positions_out_of_range() {
        let result = Track::new(vec![part(&[0.0], &[400.0], &[0.0])], 0.0);
        assert!(result.is_err());
    }
}
