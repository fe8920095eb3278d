use geo::Point;
use proj::Proj;
use tracing::debug;

use crate::error::{ExpandError, Result};

/// Moves points from one reference system to another. Equal identifiers give
/// an identity transform that never touches PROJ.
pub struct Reprojector {
    from: String,
    to: String,
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn new(from: &str, to: &str) -> Result<Self> {
        let proj = if same_crs(from, to) {
            debug!("{} and {} are the same reference system, skipping reprojection", from, to);
            None
        } else {
            debug!("Creating projection from {} to {}", from, to);
            // new_known_crs normalises axis order, so geographic CRS take (lon, lat)
            let proj = Proj::new_known_crs(from, to, None).map_err(|source| {
                ExpandError::Projection {
                    from: from.to_owned(),
                    to: to.to_owned(),
                    source,
                }
            })?;
            Some(proj)
        };

        Ok(Reprojector {
            from: from.to_owned(),
            to: to.to_owned(),
            proj,
        })
    }

    pub fn from_crs(&self) -> &str {
        &self.from
    }

    pub fn to_crs(&self) -> &str {
        &self.to
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    pub fn project(&self, point: Point<f64>) -> Result<Point<f64>> {
        let Some(proj) = &self.proj else {
            return Ok(point);
        };
        let (x, y) = proj
            .convert((point.x(), point.y()))
            .map_err(|source| ExpandError::Transform {
                x: point.x(),
                y: point.y(),
                source,
            })?;
        Ok(Point::new(x, y))
    }
}

pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// EPSG code of an `EPSG:<code>` identifier.
pub fn epsg_code(crs: &str) -> Option<u32> {
    let crs = crs.trim();
    let (authority, code) = crs.split_once(':')?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    code.trim().parse().ok()
}
