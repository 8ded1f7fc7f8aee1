//! KDL value extraction helpers.

/// Convert a byte offset to line and column numbers (1-indexed)
pub fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in content.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn first_child_value<'a>(node: &'a kdl::KdlNode, name: &str) -> Option<&'a kdl::KdlValue> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .map(|e| e.value())
}

/// String value of the child node `name`
pub fn get_string_entry(node: &kdl::KdlNode, name: &str) -> Option<String> {
    first_child_value(node, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Integer value of the child node `name`
pub fn get_int_entry(node: &kdl::KdlNode, name: &str) -> Option<i128> {
    first_child_value(node, name).and_then(|v| v.as_integer())
}

/// Boolean value of the child node `name`
pub fn get_bool_entry(node: &kdl::KdlNode, name: &str) -> Option<bool> {
    first_child_value(node, name).and_then(|v| v.as_bool())
}

/// Non-negative integer of the child node `name`, rejecting negatives and overflow
pub fn get_u64_entry(node: &kdl::KdlNode, name: &str) -> anyhow::Result<Option<u64>> {
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| anyhow::anyhow!("'{}' must be a non-negative integer, got {}", name, v)),
    }
}

/// All string arguments of the child node `name`
pub fn get_string_args(node: &kdl::KdlNode, name: &str) -> Vec<String> {
    node.children()
        .and_then(|children| children.get(name))
        .map(|n| {
            n.entries()
                .iter()
                .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(src: &str) -> kdl::KdlNode {
        let doc: kdl::KdlDocument = src.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_offset_to_line_col() {
        let content = "a\nbc\nd";
        assert_eq!(offset_to_line_col(content, 0), (1, 1));
        assert_eq!(offset_to_line_col(content, 3), (2, 2));
        assert_eq!(offset_to_line_col(content, 5), (3, 1));
    }

    #[test]
    fn test_entry_helpers() {
        let n = node(
            r#"block {
                name "value"
                count 42
                enabled #false
                servers "1.1.1.1" "8.8.8.8"
            }"#,
        );

        assert_eq!(get_string_entry(&n, "name").as_deref(), Some("value"));
        assert_eq!(get_int_entry(&n, "count"), Some(42));
        assert_eq!(get_bool_entry(&n, "enabled"), Some(false));
        assert_eq!(get_string_args(&n, "servers"), vec!["1.1.1.1", "8.8.8.8"]);
        assert_eq!(get_string_entry(&n, "missing"), None);
    }

    #[test]
    fn test_get_u64_entry_rejects_negative() {
        let n = node("block { timeout -5 }");
        assert!(get_u64_entry(&n, "timeout").is_err());

        let n = node("block { timeout 5 }");
        assert_eq!(get_u64_entry(&n, "timeout").unwrap(), Some(5));
    }
}
