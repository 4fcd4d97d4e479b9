//! Fuzzy name comparison for identity consistency.

use crate::pipeline::extraction::names::normalize_name;

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 { return n; }
    if n == 0 { return m; }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Similarity in [0, 1] of two names after normalization:
/// `1 - distance / longer length`.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

/// Group names into entities: two names belong together when a chain of
/// pairwise similarities at or above `threshold` links them. Returns
/// indices into `names` per entity, in first-seen order.
pub fn cluster_names(names: &[&str], threshold: f64) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..names.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            if name_similarity(names[i], names[j]) >= threshold {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut clusters: Vec<(usize, Vec<usize>)> = Vec::new();
    for i in 0..names.len() {
        let r = root(&mut parent, i);
        match clusters.iter_mut().find(|(id, _)| *id == r) {
            Some((_, members)) => members.push(i),
            None => clusters.push((r, vec![i])),
        }
    }
    clusters.into_iter().map(|(_, members)| members).collect()
}
