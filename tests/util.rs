#![allow(dead_code)]
use std::thread;

use mesh_adapt_bridge::algs::communicator::LocalComm;
use mesh_adapt_bridge::mesh::adaptation::AdaptationMesh;
use mesh_adapt_bridge::mesh::solver::SolverMesh;
use mesh_adapt_bridge::topology::dimension::EntityDim;

/// Run `f` once per rank of a fresh in-process world, one thread per rank.
/// Results come back in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = LocalComm::world(n)
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Node-major buffer of `f` evaluated at every solver node.
pub fn nodal(mesh: &SolverMesh, f: impl Fn([f64; 3]) -> f64) -> Vec<f64> {
    mesh.node_coords.iter().map(|&x| f(x)).collect()
}

/// Sorted x coordinates of the live vertices.
pub fn sorted_x(mesh: &AdaptationMesh) -> Vec<f64> {
    let mut xs: Vec<f64> = mesh
        .handles(EntityDim::Vertex)
        .map(|v| mesh.point(v).unwrap()[0])
        .collect();
    xs.sort_by(f64::total_cmp);
    xs
}

/// Number of solver nodes with `lo <= x <= hi`.
pub fn nodes_in(mesh: &SolverMesh, lo: f64, hi: f64) -> usize {
    mesh.node_coords
        .iter()
        .filter(|x| x[0] >= lo && x[0] <= hi)
        .count()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
