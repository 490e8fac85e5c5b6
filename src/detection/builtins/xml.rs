use crate::detection::core::DetectionResource;
use detector_macros::detector;

const GML_NAMESPACE: &str = "http://www.opengis.net/gml";
const WFS_NAMESPACE: &str = "http://www.opengis.net/wfs";
const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";

fn markup(resource: &DetectionResource) -> Option<&str> {
    let head = resource.head()?.trim_start_matches('\u{feff}').trim_start();
    head.starts_with('<').then_some(head)
}

/// Any well-formed looking XML document.
#[detector(id = "xml-document", label = "XML Document", priority = 10)]
fn matches_xml(resource: &DetectionResource) -> bool {
    markup(resource).is_some()
}

/// GML feature collection, optionally wrapped by a WFS response.
#[detector(
    id = "gml-feature-collection",
    label = "GML Feature Collection",
    parent = "xml-document",
    priority = 20
)]
fn matches_gml(resource: &DetectionResource) -> bool {
    markup(resource)
        .map(|head| {
            head.contains("FeatureCollection")
                && (head.contains(GML_NAMESPACE) || head.contains(WFS_NAMESPACE))
        })
        .unwrap_or(false)
}

#[detector(id = "atom-feed", label = "Atom Feed", parent = "xml-document", priority = 20)]
fn matches_atom(resource: &DetectionResource) -> bool {
    markup(resource)
        .map(|head| head.contains("<feed") && head.contains(ATOM_NAMESPACE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::core::TypeDetector;
    use crate::models::ResourceUri;

    fn resource(head: &str) -> DetectionResource {
        DetectionResource::new("data", ResourceUri::parse("set").unwrap()).with_head(head)
    }

    #[test]
    fn test_xml_detection() {
        assert!(XmlDocumentDetector.matches(&resource("\u{feff}  <?xml version=\"1.0\"?><a/>")));
        assert!(!XmlDocumentDetector.matches(&resource("{\"json\": true}")));
        assert!(!XmlDocumentDetector.matches(&DetectionResource::new(
            "data",
            ResourceUri::parse("set").unwrap()
        )));
    }

    #[test]
    fn test_gml_detection() {
        let gml = r#"<gml:FeatureCollection xmlns:gml="http://www.opengis.net/gml/3.2"/>"#;
        assert!(matches_gml(&resource(gml)));
        assert!(!matches_gml(&resource("<FeatureCollection/>")));
        assert_eq!(GmlFeatureCollectionDetector.parent(), Some("xml-document"));
    }

    #[test]
    fn test_atom_detection() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>t</title></feed>"#;
        assert!(AtomFeedDetector.matches(&resource(atom)));
        assert!(!AtomFeedDetector.matches(&resource("<rss/>")));
        assert_eq!(AtomFeedDetector.label(), "Atom Feed");
    }
}
