use crate::types::{Roles, Topology};

/// A supported camera model and the USB ids of its sensors.
///
/// Ids are stored as hex strings the way they are printed on the module
/// label. The unified model reports the same product id for both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraModel {
    pub name: &'static str,
    pub vendor_id: &'static str,
    pub rgb_product_id: &'static str,
    pub tof_product_id: &'static str,
}

impl CameraModel {
    pub fn topology(&self) -> Topology {
        if hex_eq(self.rgb_product_id, self.tof_product_id) {
            Topology::Unified
        } else {
            Topology::Split
        }
    }

    /// Roles served by `product_id` on this model, empty if unrecognized.
    fn roles_for(&self, product_id: &str) -> Roles {
        let mut roles = Roles::empty();
        if hex_eq(product_id, self.tof_product_id) {
            roles |= Roles::TOF;
        }
        if hex_eq(product_id, self.rgb_product_id) {
            roles |= Roles::RGB;
        }
        roles
    }
}

// -- Known models --
pub const LIPSEDGE_DL: CameraModel = CameraModel {
    name: "LIPSedge DL",
    vendor_id: "2DF2",
    rgb_product_id: "215",
    tof_product_id: "213",
};

pub const LIPSEDGE_M5: CameraModel = CameraModel {
    name: "LIPSedge M5",
    vendor_id: "2959",
    rgb_product_id: "3001",
    tof_product_id: "3001",
};

pub static MODELS: [CameraModel; 2] = [LIPSEDGE_DL, LIPSEDGE_M5];

/// Result of a successful catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogMatch {
    pub model: &'static CameraModel,
    pub roles: Roles,
}

/// Resolve a vendor/product pair to a model and the roles it serves.
///
/// Unknown vendors are ignored quietly; a known vendor with an unknown
/// product is logged as an error but is still just a non-match.
pub fn lookup(vendor_id: &str, product_id: &str) -> Option<CatalogMatch> {
    let Some(model) = MODELS.iter().find(|m| hex_eq(vendor_id, m.vendor_id)) else {
        log::info!(
            "Not a supported product ({}:{}), ignoring it",
            vendor_id,
            product_id
        );
        return None;
    };

    let roles = model.roles_for(product_id);
    if roles.is_empty() {
        log::error!(
            "Unrecognized camera module ({}:{}). Please contact vendor.",
            vendor_id,
            product_id
        );
        return None;
    }

    Some(CatalogMatch { model, roles })
}

/// Numeric variant of [`lookup`].
pub fn lookup_ids(vendor_id: u16, product_id: u16) -> Option<CatalogMatch> {
    lookup(&format!("{:X}", vendor_id), &format!("{:X}", product_id))
}

/// Text shown to the user before any USB activity begins.
pub fn supported_cameras_notice() -> String {
    let names: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
    format!(
        "This application only supports {} currently.",
        names.join(" and ")
    )
}

/// Case-insensitive hex comparison; leading zeros are not significant.
fn hex_eq(a: &str, b: &str) -> bool {
    match (
        u16::from_str_radix(a.trim(), 16),
        u16::from_str_radix(b.trim(), 16),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_model_roles() {
        let tof = lookup("2DF2", "213").unwrap();
        assert_eq!(tof.model.name, "LIPSedge DL");
        assert_eq!(tof.roles, Roles::TOF);

        let rgb = lookup("2df2", "215").unwrap();
        assert_eq!(rgb.roles, Roles::RGB);
        assert_eq!(rgb.model.topology(), Topology::Split);
    }

    #[test]
    fn test_unified_model_yields_both_roles() {
        let m5 = lookup("2959", "3001").unwrap();
        assert_eq!(m5.model.name, "LIPSedge M5");
        assert_eq!(m5.roles, Roles::TOF | Roles::RGB);
        assert_eq!(m5.model.topology(), Topology::Unified);
    }

    #[test]
    fn test_unknown_vendor_and_product() {
        assert!(lookup("046D", "213").is_none());
        assert!(lookup("2DF2", "999").is_none());
        assert!(lookup("2959", "213").is_none());
        assert!(lookup("not-hex", "213").is_none());
    }

    #[test]
    fn test_lookup_ids_and_padding() {
        assert_eq!(lookup_ids(0x2DF2, 0x0213).unwrap().roles, Roles::TOF);
        assert_eq!(lookup("2DF2", "0215").unwrap().roles, Roles::RGB);
        assert!(lookup_ids(0x1d6b, 0x0002).is_none());
    }

    #[test]
    fn test_notice_lists_models() {
        let notice = supported_cameras_notice();
        assert!(notice.contains("LIPSedge DL"));
        assert!(notice.contains("LIPSedge M5"));
    }
}
