//! Track candidates: the unit of output of every finder stage.

use crate::trajectory::HelixParams;
use crate::types::{HitId, SpacePointId, WireHit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage that last produced or extended a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Hough,
    Automaton,
    Ckf,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Hough => "hough",
            Origin::Automaton => "automaton",
            Origin::Ckf => "ckf",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackCandidate {
    /// Wire hits ordered along the trajectory (axial and stereo)
    pub hits: Vec<HitId>,
    /// Silicon space points ordered from the innermost layer outwards
    pub space_points: Vec<SpacePointId>,
    pub params: HelixParams,
    /// True once tanλ / z0 have been determined
    pub has_z: bool,
    pub fit_chi2: f64,
    pub fit_ndf: usize,
    pub quality: f64,
    pub origin: Origin,
}

impl TrackCandidate {
    pub fn new(hits: Vec<HitId>, params: HelixParams, origin: Origin) -> Self {
        let mut c = Self {
            hits,
            space_points: Vec::new(),
            params,
            has_z: false,
            fit_chi2: 0.0,
            fit_ndf: 0,
            quality: 0.0,
            origin,
        };
        c.update_quality();
        c
    }

    pub fn n_measurements(&self) -> usize {
        self.hits.len() + self.space_points.len()
    }

    pub fn chi2_per_ndf(&self) -> f64 {
        if self.fit_ndf == 0 {
            0.0
        } else {
            self.fit_chi2 / self.fit_ndf as f64
        }
    }

    /// Quality: measurement count (space points count double) damped by the
    /// fit χ²/ndf.
    pub fn update_quality(&mut self) {
        let count = (self.hits.len() + 2 * self.space_points.len()) as f64;
        self.quality = count / (1.0 + self.chi2_per_ndf());
    }

    pub fn set_fit(&mut self, params: HelixParams, chi2: f64, ndf: usize) {
        // keep the sz part when only the circle was refitted
        let (tan_lambda, z0) = (self.params.tan_lambda, self.params.z0);
        self.params = params;
        if self.has_z {
            self.params.tan_lambda = tan_lambda;
            self.params.z0 = z0;
        }
        self.fit_chi2 = chi2;
        self.fit_ndf = ndf;
        self.update_quality();
    }

    /// Order hits by arc length along the current circle.
    pub fn sort_hits(&mut self, hits: &[WireHit]) {
        let params = self.params;
        self.hits.sort_by(|a, b| {
            let sa = params.arc_length_to(hits[a.0].ref_pos);
            let sb = params.arc_length_to(hits[b.0].ref_pos);
            sa.total_cmp(&sb).then(a.cmp(b))
        });
    }

    pub fn shares_measurements(&self, other: &TrackCandidate) -> bool {
        self.hits.iter().any(|h| other.hits.contains(h))
            || self.space_points.iter().any(|s| other.space_points.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_prefers_more_hits_and_better_fit() {
        let params = HelixParams::default();
        let mut a = TrackCandidate::new((0..10).map(HitId).collect(), params, Origin::Hough);
        let b = TrackCandidate::new((0..8).map(HitId).collect(), params, Origin::Hough);
        assert!(a.quality > b.quality);

        a.set_fit(params, 70.0, 7);
        assert!(a.quality < b.quality);
    }

    #[test]
    fn refit_keeps_sz_of_3d_candidate() {
        let mut c = TrackCandidate::new(vec![HitId(0)], HelixParams::default(), Origin::Automaton);
        c.has_z = true;
        c.params.tan_lambda = 0.4;
        c.params.z0 = -1.0;
        c.set_fit(HelixParams::new_2d(0.01, 1.0, 0.0), 1.0, 1);
        assert_eq!(c.params.tan_lambda, 0.4);
        assert_eq!(c.params.curvature, 0.01);
    }
}
