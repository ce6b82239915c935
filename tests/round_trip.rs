use mesh_adapt_bridge::algs::convert::{construct_from_serial, construct_solver_mesh_back};
use mesh_adapt_bridge::algs::{meshgen, tagger};
use mesh_adapt_bridge::mesh::solver::SolverMesh;
use mesh_adapt_bridge::topology::dimension::EntityDim;

fn assert_round_trip(solver: &SolverMesh) {
    let mesh = construct_from_serial(solver).unwrap();
    let back = construct_solver_mesh_back(&mesh).unwrap();
    assert_eq!(back.node_coords, solver.node_coords);
    assert_eq!(back.element_nodes, solver.element_nodes);
    assert_eq!(back.element_boundary_nodes, solver.element_boundary_nodes);
    assert_eq!(back.element_neighbors, solver.element_neighbors);
    assert_eq!(back.edge_nodes, solver.edge_nodes);
}

#[test]
fn line_round_trip_is_exact() {
    assert_round_trip(&meshgen::line(17, -1.0, 2.5).unwrap());
}

#[test]
fn triangle_round_trip_is_exact() {
    assert_round_trip(&meshgen::rectangle(5, 3, [0.1, -0.2], [1.3, 0.7]).unwrap());
}

#[test]
fn tetrahedron_round_trip_is_exact() {
    assert_round_trip(&meshgen::box_tets(2, 2, 3, [1.0, 2.0, 0.5]).unwrap());
}

#[test]
fn materials_survive_round_trip() {
    let mut solver = meshgen::rectangle(3, 3, [0.0, 0.0], [1.0, 1.0]).unwrap();
    for (e, m) in solver.element_material.iter_mut().enumerate() {
        *m = (e % 4) as i32 - 1;
    }
    for (n, m) in solver.node_material.iter_mut().enumerate() {
        *m = if n % 5 == 0 { i32::MIN } else { n as i32 };
    }
    for &b in &solver.exterior_boundaries.clone() {
        solver.element_boundary_material[b] = i32::MAX;
    }

    let mut mesh = construct_from_serial(&solver).unwrap();
    tagger::apply(&solver, &mut mesh).unwrap();
    let mut back = construct_solver_mesh_back(&mesh).unwrap();
    tagger::restore_materials(&mut back, &mesh).unwrap();

    assert_eq!(back.element_material, solver.element_material);
    assert_eq!(back.node_material, solver.node_material);
    assert_eq!(back.element_boundary_material, solver.element_boundary_material);
}

#[test]
fn entity_counts_follow_euler() {
    // V - E + F = 1 for a triangulated disc
    let solver = meshgen::rectangle(4, 6, [0.0, 0.0], [1.0, 1.0]).unwrap();
    let mesh = construct_from_serial(&solver).unwrap();
    let v = mesh.count(EntityDim::Vertex) as i64;
    let e = mesh.count(EntityDim::Edge) as i64;
    let f = mesh.count(EntityDim::Face) as i64;
    assert_eq!(v - e + f, 1);
    assert_eq!(e as usize, solver.edge_nodes.len());
}
