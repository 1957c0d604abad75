use crate::{USER_CATEGORY_NAME, USER_FILE_NAME};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct TreeNode {
    files: BTreeSet<String>,
    children: BTreeMap<String, TreeNode>,
}

/// Renders category names as an indented directory listing for logs.
///
/// ```text
/// - api.md, user.local.md
/// - lang
///   |- go.md, rust.md
/// ```
pub fn render_category_tree<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut root = TreeNode::default();
    for name in names {
        let mut parts: Vec<&str> = name.split('/').collect();
        let Some(leaf) = parts.pop() else {
            continue;
        };
        let mut node = &mut root;
        for part in parts {
            node = node.children.entry(part.to_string()).or_default();
        }
        let file = if name == USER_CATEGORY_NAME {
            USER_FILE_NAME.to_string()
        } else {
            format!("{leaf}.md")
        };
        node.files.insert(file);
    }
    tree_lines(&root).join("\n")
}

fn tree_lines(node: &TreeNode) -> Vec<String> {
    let mut lines = Vec::new();
    if !node.files.is_empty() {
        lines.push(format!(
            "- {}",
            node.files.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    for (name, child) in &node.children {
        lines.push(format!("- {name}"));
        lines.extend(tree_lines(child).into_iter().map(|line| format!("  |{line}")));
    }
    lines
}
