//! Neighbour grouping of raw sliding-window hits.
//!
//! Windows that fire at nearby positions and scales are clustered, each
//! cluster is averaged into one box, and clusters supported by too few raw
//! hits are dropped. Small clusters nested inside a better-supported one are
//! removed as well.

use crate::types::FaceBox;

/// Relative tolerance for two windows to count as the same object.
pub const GROUP_EPS: f64 = 0.2;

fn similar(a: &FaceBox, b: &FaceBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: i64, q: i64| ((p - q).abs() as f64) <= delta;
    close(a.x as i64, b.x as i64)
        && close(a.y as i64, b.y as i64)
        && close(a.right() as i64, b.right() as i64)
        && close(a.bottom() as i64, b.bottom() as i64)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster labels per input rectangle, numbered by first appearance.
fn partition(rects: &[FaceBox], eps: f64) -> (Vec<usize>, usize) {
    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut label_of_root = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut count = 0;
    for i in 0..n {
        let root = find(&mut parent, i);
        if label_of_root[root] == usize::MAX {
            label_of_root[root] = count;
            count += 1;
        }
        labels.push(label_of_root[root]);
    }
    (labels, count)
}

/// Group raw detections. Clusters need strictly more than `min_neighbors`
/// members to survive; `min_neighbors == 0` returns the input unchanged.
pub fn group_rectangles(rects: Vec<FaceBox>, min_neighbors: usize, eps: f64) -> Vec<FaceBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, nclasses) = partition(&rects, eps);

    let mut sums = vec![[0u64; 4]; nclasses];
    let mut counts = vec![0usize; nclasses];
    for (r, &label) in rects.iter().zip(labels.iter()) {
        let s = &mut sums[label];
        s[0] += r.x as u64;
        s[1] += r.y as u64;
        s[2] += r.width as u64;
        s[3] += r.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<FaceBox> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            FaceBox::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut out = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            out.push(*r1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_neighbors_passthrough() {
        let rects = vec![FaceBox::new(0, 0, 24, 24), FaceBox::new(100, 100, 24, 24)];
        assert_eq!(group_rectangles(rects.clone(), 0, GROUP_EPS), rects);
    }

    #[test]
    fn test_cluster_averaging() {
        let rects = vec![
            FaceBox::new(10, 10, 30, 30),
            FaceBox::new(12, 10, 30, 30),
            FaceBox::new(11, 12, 32, 30),
        ];
        let grouped = group_rectangles(rects, 2, GROUP_EPS);
        assert_eq!(grouped, vec![FaceBox::new(11, 11, 31, 30)]);
    }

    #[test]
    fn test_sparse_cluster_dropped() {
        // Dense cluster of 4 hits, isolated cluster of 1 hit
        let mut rects: Vec<FaceBox> = (0..4).map(|i| FaceBox::new(50 + i, 50, 40, 40)).collect();
        rects.push(FaceBox::new(200, 200, 40, 40));
        let grouped = group_rectangles(rects, 2, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].y, 50);
    }

    #[test]
    fn test_nested_weaker_cluster_removed() {
        // Big well-supported cluster, small cluster inside it with fewer hits
        let mut rects: Vec<FaceBox> = (0..8).map(|_| FaceBox::new(0, 0, 100, 100)).collect();
        rects.extend((0..2).map(|_| FaceBox::new(30, 30, 24, 24)));
        let grouped = group_rectangles(rects, 1, GROUP_EPS);
        assert_eq!(grouped, vec![FaceBox::new(0, 0, 100, 100)]);
    }
}
