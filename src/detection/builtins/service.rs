use crate::detection::core::DetectionResource;
use crate::models::{TestObject, RESOURCE_SERVICE_ENDPOINT};
use detector_macros::detector;

/// Property carrying the OGC service type, e.g. "WFS"
pub const PROP_SERVICE_TYPE: &str = "serviceType";

fn service_param(url: &reqwest::Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case("service"))
        .map(|(_, value)| value.to_ascii_uppercase())
        .filter(|value| !value.is_empty())
}

/// Remote OGC web service addressed with a `service=` parameter.
#[detector(
    id = "ows-service",
    label = "OGC Web Service",
    priority = 30,
    normalize = "stamp_service_type"
)]
fn matches_ows(resource: &DetectionResource) -> bool {
    resource.url().and_then(service_param).is_some()
}

fn stamp_service_type(object: &mut TestObject) {
    let service = object
        .resource(RESOURCE_SERVICE_ENDPOINT)
        .and_then(|uri| uri.as_url())
        .and_then(service_param);
    if let Some(service) = service {
        object.set_property(PROP_SERVICE_TYPE, service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::core::TypeDetector;
    use crate::models::ResourceUri;

    #[test]
    fn test_ows_detection() {
        let wfs = ResourceUri::parse("https://example.org/ows?SERVICE=wfs&request=GetCapabilities")
            .unwrap();
        assert!(OwsServiceDetector.matches(&DetectionResource::new("serviceEndpoint", wfs)));

        let plain = ResourceUri::parse("https://example.org/ows").unwrap();
        assert!(!OwsServiceDetector.matches(&DetectionResource::new("serviceEndpoint", plain)));

        let local = ResourceUri::parse("set").unwrap();
        assert!(!OwsServiceDetector.matches(&DetectionResource::new("data", local)));
    }

    #[test]
    fn test_normalize_stamps_service_type() {
        let mut object = TestObject::new();
        object.add_resource(
            RESOURCE_SERVICE_ENDPOINT,
            ResourceUri::parse("https://example.org/ows?service=wms").unwrap(),
        );

        OwsServiceDetector.normalize(&mut object);
        assert_eq!(object.property(PROP_SERVICE_TYPE), Some("WMS"));
    }
}
