use std::fs;

/// Linux's base page size in bytes. `numa_maps` reports page counts, not
/// bytes; 4 KiB is correct for every x86_64/aarch64 target this pipeline
/// is specified for.
const PAGE_SIZE_BYTES: u64 = 4096;

/// Sums the per-node page counts (`N<k>=<pages>`) across every mapping
/// line of a `numa_maps` file, covering both anonymous and file-backed
/// mappings.
///
/// Returns resident bytes per NUMA node, indexed `0..n_nodes`. Node
/// indices beyond `n_nodes` (e.g. memory-less nodes not modeled by the
/// discovered topology) are ignored.
pub fn parse_numa_maps(content: &str, n_nodes: usize) -> Vec<u64> {
    let mut pages_per_node = vec![0u64; n_nodes];

    for line in content.lines() {
        for token in line.split_whitespace() {
            let Some(rest) = token.strip_prefix('N') else { continue };
            let Some((node_str, pages_str)) = rest.split_once('=') else { continue };
            let Ok(node) = node_str.parse::<usize>() else { continue };
            let Ok(pages) = pages_str.parse::<u64>() else { continue };
            if node < n_nodes {
                pages_per_node[node] += pages;
            }
        }
    }

    pages_per_node.into_iter().map(|p| p * PAGE_SIZE_BYTES).collect()
}

pub fn read_numa_maps(path: &str, n_nodes: usize) -> anyhow::Result<Vec<u64>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_numa_maps(&content, n_nodes))
}

#[cfg(test)]
mod tests {
    use super::parse_numa_maps;

    #[test]
    fn sums_pages_across_lines() {
        let content = "\
7f0000000000 default file=/lib/libc.so anon=10 dirty=10 N0=6 N1=4
7f0000100000 default anon=20 dirty=20 active=0 N0=15 N1=5
";
        let bytes = parse_numa_maps(content, 2);
        assert_eq!(bytes[0], (6 + 15) * 4096);
        assert_eq!(bytes[1], (4 + 5) * 4096);
    }

    #[test]
    fn ignores_nodes_outside_topology() {
        let content = "7f0000000000 default anon=5 N0=5 N3=5\n";
        let bytes = parse_numa_maps(content, 2);
        assert_eq!(bytes, vec![5 * 4096, 0]);
    }

    #[test]
    fn empty_file_yields_zeros() {
        assert_eq!(parse_numa_maps("", 2), vec![0, 0]);
    }
}
