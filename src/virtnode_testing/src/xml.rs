/// Build a node-device descriptor document for a test device.
pub fn device_xml(name: &str, parent: Option<&str>, caps: &[&str]) -> String {
    let mut xml = String::new();
    xml.push_str("<device>\n");
    xml.push_str(&format!("  <name>{name}</name>\n"));
    if let Some(parent) = parent {
        xml.push_str(&format!("  <parent>{parent}</parent>\n"));
    }
    for cap in caps {
        xml.push_str(&format!("  <capability type='{cap}'/>\n"));
    }
    xml.push_str("</device>\n");
    xml
}

fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

/// The device name from a descriptor document, if it has one.
pub fn parse_device_name(xml: &str) -> Option<String> {
    tag_text(xml, "name")
}

/// The parent name from a descriptor document, if it has one.
pub fn parse_device_parent(xml: &str) -> Option<String> {
    tag_text(xml, "parent")
}

/// All capability type names from a descriptor document, in order.
pub fn parse_device_caps(xml: &str) -> Vec<String> {
    const MARKER: &str = "<capability type='";
    let mut caps = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(MARKER) {
        rest = &rest[pos + MARKER.len()..];
        match rest.find('\'') {
            Some(end) => {
                caps.push(rest[..end].to_string());
                rest = &rest[end..];
            }
            None => break,
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::{device_xml, parse_device_caps, parse_device_name, parse_device_parent};

    #[test]
    fn descriptor_round_trip() {
        let xml = device_xml("usb_1_4", Some("usb_1"), &["usb_device", "net"]);
        assert_eq!(parse_device_name(&xml).as_deref(), Some("usb_1_4"));
        assert_eq!(parse_device_parent(&xml).as_deref(), Some("usb_1"));
        assert_eq!(parse_device_caps(&xml), vec!["usb_device", "net"]);
    }

    #[test]
    fn descriptor_without_parent_or_caps() {
        let xml = device_xml("computer", None, &[]);
        assert_eq!(parse_device_name(&xml).as_deref(), Some("computer"));
        assert_eq!(parse_device_parent(&xml), None);
        assert!(parse_device_caps(&xml).is_empty());
    }

    #[test]
    fn malformed_descriptor_has_no_name() {
        assert_eq!(parse_device_name("<device/>"), None);
    }
}
