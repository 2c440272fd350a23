use std::collections::{HashMap, HashSet};

/// Detects a cycle in the upstream map (task name -> names it depends on).
/// References to names absent from the map are ignored here; the graph
/// builder rejects them separately.
pub fn has_cycle(upstream: &HashMap<String, Vec<String>>) -> bool {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    fn dfs(
        name: &str,
        upstream: &HashMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> bool {
        if rec_stack.contains(name) {
            return true;
        }
        if visited.contains(name) {
            return false;
        }

        visited.insert(name.to_string());
        rec_stack.insert(name.to_string());

        if let Some(deps) = upstream.get(name) {
            for dep in deps {
                if dfs(dep, upstream, visited, rec_stack) {
                    return true;
                }
            }
        }

        rec_stack.remove(name);
        false
    }

    for name in upstream.keys() {
        if !visited.contains(name) && dfs(name, upstream, &mut visited, &mut rec_stack) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(n, ups)| {
                (
                    n.to_string(),
                    ups.iter().map(|u| u.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn chain_has_no_cycle() {
        let m = map(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert!(!has_cycle(&m));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let m = map(&[("a", &["a"])]);
        assert!(has_cycle(&m));
    }

    #[test]
    fn two_node_loop_is_a_cycle() {
        let m = map(&[("a", &["b"]), ("b", &["a"])]);
        assert!(has_cycle(&m));
    }

    #[test]
    fn diamond_has_no_cycle() {
        let m = map(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        assert!(!has_cycle(&m));
    }
}
