//! Flattened scene buffers and the bounding volume hierarchy over them.
//!
//! The scene tree is flattened into plain `Pod` arrays, the layout a
//! massively parallel backend consumes: triangles (rects become two each),
//! spheres staged separately, and a node array built over triangle indices.
//! Traversal here runs on the CPU with an explicit stack.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use ember_core::{
    get_sphere_uv, intersect_sphere, intersect_triangle, triangle_normal, HitRecord, Hittable, Material,
    Scene, Surface,
};
use ember_math::{Aabb, Interval, Ray, Vec3};

/// Maximum triangles per leaf node before splitting.
pub const LEAF_MAX_SIZE: u32 = 4;

/// Marks a triangle that does not come from a mesh.
pub const NO_PRIMITIVE: u32 = u32::MAX;

/// Triangle with indices into the material and object tables.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub material: u32,
    pub v1: [f32; 3],
    pub object: u32,
    pub v2: [f32; 3],
    /// Triangle index within its mesh, or `NO_PRIMITIVE`
    pub primitive: u32,
}

impl GpuTriangle {
    fn vertices(&self) -> [Vec3; 3] {
        [Vec3::from(self.v0), Vec3::from(self.v1), Vec3::from(self.v2)]
    }

    fn bounds(&self) -> Aabb {
        Aabb::from_iter_points(self.vertices())
    }

    fn centroid(&self) -> Vec3 {
        let [a, b, c] = self.vertices();
        (a + b + c) / 3.0
    }
}

/// Sphere with indices into the material and object tables.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GpuSphere {
    pub center: [f32; 3],
    pub radius: f32,
    pub material: u32,
    pub object: u32,
    pub _pad: [u32; 2],
}

/// BVH node.
///
/// `count == 0` marks an internal node whose children sit at `first` and
/// `first + 1`; otherwise the node is a leaf over triangles
/// `first..first + count`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub min: [f32; 3],
    pub first: u32,
    pub max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::from(self.min),
            max: Vec3::from(self.max),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    fn set_bounds(&mut self, bounds: Aabb) {
        self.min = bounds.min.to_array();
        self.max = bounds.max.to_array();
    }
}

/// Node array plus the number of slots actually used.
#[derive(Clone, Debug, Default)]
pub struct Bvh {
    /// `2N - 1` slots for `N` triangles; empty when there are none
    pub nodes: Vec<BvhNode>,
    pub nodes_used: usize,
}

impl Bvh {
    /// Build over `triangles`, reordering them so every leaf is contiguous.
    pub fn build(triangles: &mut [GpuTriangle]) -> Self {
        let n = triangles.len();
        if n == 0 {
            return Self::default();
        }
        assert!(n <= u32::MAX as usize / 2, "too many triangles for a BVH: {}", n);

        let mut nodes = vec![BvhNode::zeroed(); 2 * n - 1];
        nodes[0].first = 0;
        nodes[0].count = n as u32;
        nodes[0].set_bounds(range_bounds(triangles, 0, n as u32));
        let mut nodes_used = 1;

        // Explicit stack: a lopsided midpoint split must not blow the call stack
        let mut pending = vec![0usize];
        while let Some(index) = pending.pop() {
            let node = nodes[index];
            if node.count <= LEAF_MAX_SIZE {
                continue;
            }

            let left_count = partition(triangles, &node);
            let left = nodes_used;
            nodes_used += 2;

            nodes[left] = BvhNode {
                first: node.first,
                count: left_count,
                ..Default::default()
            };
            nodes[left].set_bounds(range_bounds(triangles, node.first, left_count));

            nodes[left + 1] = BvhNode {
                first: node.first + left_count,
                count: node.count - left_count,
                ..Default::default()
            };
            nodes[left + 1].set_bounds(range_bounds(triangles, node.first + left_count, node.count - left_count));

            nodes[index].first = left as u32;
            nodes[index].count = 0;

            pending.push(left + 1);
            pending.push(left);
        }

        log::debug!("Built BVH: {} triangles, {} of {} nodes used", n, nodes_used, nodes.len());
        Self { nodes, nodes_used }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Used nodes in build order.
    pub fn used_nodes(&self) -> &[BvhNode] {
        &self.nodes[..self.nodes_used]
    }
}

fn range_bounds(triangles: &[GpuTriangle], first: u32, count: u32) -> Aabb {
    triangles[first as usize..(first + count) as usize]
        .iter()
        .fold(Aabb::EMPTY, |acc, tri| Aabb::merge(&acc, &tri.bounds()))
}

/// Split a node's range around the midpoint of its longest axis.
///
/// Returns the size of the left half, falling back to a median split
/// when every centroid lands on one side.
fn partition(triangles: &mut [GpuTriangle], node: &BvhNode) -> u32 {
    let bounds = node.bounds();
    let axis = bounds.longest_axis();
    let split = bounds.centroid()[axis];

    let range = &mut triangles[node.first as usize..(node.first + node.count) as usize];
    let mut i = 0;
    let mut j = range.len();
    while i < j {
        if range[i].centroid()[axis] < split {
            i += 1;
        } else {
            j -= 1;
            range.swap(i, j);
        }
    }

    if i == 0 || i == range.len() {
        let mid = range.len() / 2;
        range.select_nth_unstable_by(mid, |a, b| a.centroid()[axis].total_cmp(&b.centroid()[axis]));
        return mid as u32;
    }
    i as u32
}

/// A scene flattened into buffers behind a BVH.
#[derive(Clone, Debug, Default)]
pub struct FlatScene {
    pub triangles: Vec<GpuTriangle>,
    pub spheres: Vec<GpuSphere>,
    pub bvh: Bvh,
    materials: Vec<Arc<Material>>,
    objects: Vec<u64>,
}

#[derive(Default)]
struct Flattener {
    scene: FlatScene,
    material_index: HashMap<*const Material, u32>,
}

impl Flattener {
    fn material(&mut self, surface: &Surface) -> u32 {
        let material = match surface.material() {
            Some(material) => material,
            None => panic!(
                "material '{}' of object {} was never resolved; call update_materials first",
                surface.material_id,
                surface.id()
            ),
        };
        let materials = &mut self.scene.materials;
        *self.material_index.entry(Arc::as_ptr(material)).or_insert_with(|| {
            materials.push(Arc::clone(material));
            (materials.len() - 1) as u32
        })
    }

    fn object(&mut self, id: u64) -> u32 {
        self.scene.objects.push(id);
        (self.scene.objects.len() - 1) as u32
    }

    fn push_triangle(&mut self, [v0, v1, v2]: [Vec3; 3], material: u32, object: u32, primitive: u32) {
        self.scene.triangles.push(GpuTriangle {
            v0: v0.to_array(),
            material,
            v1: v1.to_array(),
            object,
            v2: v2.to_array(),
            primitive,
        });
    }

    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, material: u32, object: u32) {
        let [a, b, c, d] = corners;
        for [v0, v1, v2] in [[a, b, c], [a, c, d]] {
            // Keep the winding normal on the rect's outward side
            let tri = if triangle_normal(v0, v1, v2).dot(normal) < 0.0 {
                [v0, v2, v1]
            } else {
                [v0, v1, v2]
            };
            self.push_triangle(tri, material, object, NO_PRIMITIVE);
        }
    }

    fn add(&mut self, object: &Hittable) {
        match object {
            Hittable::Scene(scene) => {
                for member in scene.objects() {
                    self.add(member);
                }
            }
            Hittable::Sphere(sphere) => {
                let material = self.material(&sphere.surface);
                let object = self.object(sphere.surface.id());
                self.scene.spheres.push(GpuSphere {
                    center: sphere.center.to_array(),
                    radius: sphere.radius,
                    material,
                    object,
                    _pad: [0; 2],
                });
            }
            Hittable::RectXy(rect) => {
                let (material, object) = (self.material(&rect.surface), self.object(rect.surface.id()));
                self.push_quad(rect.world_corners(), rect.outward_normal(), material, object);
            }
            Hittable::RectXz(rect) => {
                let (material, object) = (self.material(&rect.surface), self.object(rect.surface.id()));
                self.push_quad(rect.world_corners(), rect.outward_normal(), material, object);
            }
            Hittable::RectYz(rect) => {
                let (material, object) = (self.material(&rect.surface), self.object(rect.surface.id()));
                self.push_quad(rect.world_corners(), rect.outward_normal(), material, object);
            }
            Hittable::Mesh(mesh) => {
                let (material, object) = (self.material(&mesh.surface), self.object(mesh.surface.id()));
                for (index, tri) in mesh.world_triangles().iter().enumerate() {
                    self.push_triangle(*tri, material, object, index as u32);
                }
            }
        }
    }
}

impl FlatScene {
    /// Flatten a prepared scene (materials resolved, boxes built) and build its BVH.
    pub fn build(scene: &Scene) -> Self {
        let mut flattener = Flattener::default();
        for object in scene.objects() {
            flattener.add(object);
        }

        let mut flat = flattener.scene;
        flat.bvh = Bvh::build(&mut flat.triangles);
        log::info!(
            "Flattened scene '{}': {} triangles, {} spheres, {} materials",
            scene.name,
            flat.triangles.len(),
            flat.spheres.len(),
            flat.materials.len()
        );
        flat
    }

    /// True when there is nothing to intersect.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.spheres.is_empty()
    }

    /// Raw triangle buffer, ready for upload.
    pub fn triangle_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }

    /// Raw node buffer, ready for upload.
    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.bvh.used_nodes())
    }

    /// Closest hit over spheres and the BVH.
    pub fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let mut closest: Option<HitRecord<'a>> = None;
        let mut interval = ray_t;

        for sphere in &self.spheres {
            let center = Vec3::from(sphere.center);
            if let Some((t, outward_normal)) = intersect_sphere(center, sphere.radius, ray, interval) {
                interval = interval.with_max(t);
                let uv = get_sphere_uv(outward_normal);
                closest = Some(self.record(ray, t, outward_normal, uv, sphere.material, sphere.object, None));
            }
        }

        if let Some((index, t, u, v)) = self.traverse(ray, interval) {
            let tri = &self.triangles[index];
            let [v0, v1, v2] = tri.vertices();
            let primitive = (tri.primitive != NO_PRIMITIVE).then_some(tri.primitive);
            closest = Some(self.record(
                ray,
                t,
                triangle_normal(v0, v1, v2),
                (u, v),
                tri.material,
                tri.object,
                primitive,
            ));
        }

        closest
    }

    /// Closest triangle as `(index, t, u, v)`.
    fn traverse(&self, ray: &Ray, ray_t: Interval) -> Option<(usize, f32, f32, f32)> {
        if self.bvh.is_empty() {
            return None;
        }

        let inv_dir = ray.inv_direction();
        let mut interval = ray_t;
        let mut closest = None;
        let mut stack = Vec::with_capacity(64);
        stack.push(0usize);

        while let Some(index) = stack.pop() {
            let node = &self.bvh.nodes[index];
            if !node.bounds().hit_with_inv(ray.origin, inv_dir, interval) {
                continue;
            }

            if node.is_leaf() {
                let first = node.first as usize;
                for tri_index in first..first + node.count as usize {
                    let [v0, v1, v2] = self.triangles[tri_index].vertices();
                    if let Some(hit) = intersect_triangle(ray, v0, v1, v2, interval) {
                        interval = interval.with_max(hit.t);
                        closest = Some((tri_index, hit.t, hit.u, hit.v));
                    }
                }
            } else {
                stack.push(node.first as usize + 1);
                stack.push(node.first as usize);
            }
        }

        closest
    }

    #[allow(clippy::too_many_arguments)]
    fn record<'a>(
        &'a self,
        ray: &Ray,
        t: f32,
        outward_normal: Vec3,
        uv: (f32, f32),
        material: u32,
        object: u32,
        triangle: Option<u32>,
    ) -> HitRecord<'a> {
        let mut rec = HitRecord {
            p: ray.at(t),
            normal: outward_normal,
            t,
            u: uv.0,
            v: uv.1,
            front_face: true,
            material: &self.materials[material as usize],
            object_id: self.objects[object as usize],
            triangle,
        };
        rec.set_face_normal(ray, outward_normal);
        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{Color, MaterialLibrary, Rect, Sphere, StaticMesh, Xz};
    use ember_math::Vec2;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    fn random_triangles(n: usize, seed: u64) -> Vec<GpuTriangle> {
        let mut rng = Pcg32::seed_from_u64(seed);
        let point = |rng: &mut Pcg32| {
            [rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)]
        };
        (0..n)
            .map(|i| GpuTriangle {
                v0: point(&mut rng),
                material: 0,
                v1: point(&mut rng),
                object: 0,
                v2: point(&mut rng),
                primitive: i as u32,
            })
            .collect()
    }

    fn prepared(mut scene: Scene) -> Scene {
        let mut library = MaterialLibrary::new();
        library.insert("grey", Material::diffuse(Color::splat(0.5)));
        library.insert("lamp", Material::light(Color::splat(4.0)));
        scene.update_materials(&library);
        scene.build_boxes();
        scene
    }

    #[test]
    fn test_bvh_empty() {
        let bvh = Bvh::build(&mut []);
        assert!(bvh.is_empty());
        assert_eq!(bvh.nodes_used, 0);
    }

    #[test]
    fn test_bvh_single_leaf() {
        let mut tris = random_triangles(3, 1);
        let bvh = Bvh::build(&mut tris);
        assert_eq!(bvh.nodes.len(), 5);
        assert_eq!(bvh.nodes_used, 1);
        assert!(bvh.nodes[0].is_leaf());
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_bvh_properties() {
        for (n, seed) in [(5, 2), (17, 3), (100, 4), (513, 5)] {
            let mut tris = random_triangles(n, seed);
            let bvh = Bvh::build(&mut tris);

            assert_eq!(bvh.nodes.len(), 2 * n - 1);
            assert!(bvh.nodes_used <= 2 * n - 1);

            // Root contains every vertex
            let root = bvh.nodes[0].bounds();
            for tri in &tris {
                for v in tri.vertices() {
                    assert!(root.contains_point(v), "root misses {v:?}");
                }
            }

            // Leaves hold at most four triangles and cover each exactly once
            let mut seen = vec![0u32; n];
            for node in bvh.used_nodes().iter().filter(|node| node.is_leaf()) {
                assert!(node.count <= LEAF_MAX_SIZE);
                for i in node.first..node.first + node.count {
                    seen[i as usize] += 1;
                    for v in tris[i as usize].vertices() {
                        assert!(node.bounds().contains_point(v));
                    }
                }
            }
            assert!(seen.iter().all(|&count| count == 1));

            // Full binary tree: every internal node has two children in range
            let used = bvh.used_nodes();
            assert_eq!(used.len() % 2, 1);
            let leaves = used.iter().filter(|node| node.is_leaf()).count();
            assert_eq!(leaves, (used.len() + 1) / 2);
            for node in used.iter().filter(|node| !node.is_leaf()) {
                assert!((node.first as usize + 1) < used.len());
            }
        }
    }

    #[test]
    fn test_bvh_identical_centroids_fall_back_to_median() {
        let tri = GpuTriangle {
            v0: [0.0, 0.0, 0.0],
            material: 0,
            v1: [1.0, 0.0, 0.0],
            object: 0,
            v2: [0.0, 1.0, 0.0],
            primitive: 0,
        };
        let mut tris = vec![tri; 9];
        let bvh = Bvh::build(&mut tris);

        let leaves: Vec<_> = bvh.used_nodes().iter().filter(|node| node.is_leaf()).collect();
        assert!(leaves.iter().all(|leaf| leaf.count <= LEAF_MAX_SIZE));
        assert_eq!(leaves.iter().map(|leaf| leaf.count).sum::<u32>(), 9);
    }

    #[test]
    fn test_pod_layout() {
        assert_eq!(std::mem::size_of::<GpuTriangle>(), 48);
        assert_eq!(std::mem::size_of::<GpuSphere>(), 32);
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
    }

    #[test]
    fn test_flat_scene_matches_reference() {
        let mut scene = Scene::new();
        scene.add(Sphere::new(Vec3::new(0.0, 0.0, -3.0), 1.0, "grey"));
        scene.add(Rect::<Xz>::new(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 5.0), -1.0, "grey"));
        scene.add(Rect::<Xz>::new(Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0), 4.0, "lamp"));
        scene.add(
            StaticMesh::from_triangles(
                vec![[Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)]],
                "grey",
            )
            .with_transform(Vec3::new(3.0, 0.0, -2.0), Vec3::ONE, 0.0),
        );
        let scene = prepared(scene);
        let flat = FlatScene::build(&scene);

        assert_eq!(flat.spheres.len(), 1);
        assert_eq!(flat.triangles.len(), 5);

        let mut rng = Pcg32::seed_from_u64(9);
        for _ in 0..500 {
            let origin = Vec3::new(rng.gen_range(-2.0..2.0), rng.gen_range(0.0..2.0), rng.gen_range(-1.0..2.0));
            let direction = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let ray = Ray::new(origin, direction);
            let ray_t = Interval::new(0.001, f32::INFINITY);

            let expected = ember_core::Hit::hit(&scene, &ray, ray_t);
            let actual = flat.hit(&ray, ray_t);
            match (expected, actual) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    assert!((a.t - b.t).abs() < 1e-3, "t {} vs {}", a.t, b.t);
                    assert_eq!(a.object_id, b.object_id);
                    assert!((a.normal - b.normal).length() < 1e-3);
                    assert_eq!(a.front_face, b.front_face);
                    assert_eq!(a.material, b.material);
                }
                (a, b) => panic!("mismatch: {:?} vs {:?}", a.map(|r| r.t), b.map(|r| r.t)),
            }
        }
    }

    #[test]
    fn test_flat_scene_records_mesh_triangle() {
        let mut scene = Scene::new();
        scene.add(StaticMesh::from_triangles(
            vec![
                [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)],
                [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
            ],
            "grey",
        ));
        let flat = FlatScene::build(&prepared(scene));

        let ray = Ray::new(Vec3::new(0.2, 0.8, 1.0), Vec3::NEG_Z);
        let rec = flat.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert_eq!(rec.triangle, Some(1));
        assert!(!flat.node_bytes().is_empty());
        assert_eq!(flat.triangle_bytes().len(), 96);
    }
}
