use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use truvis_handle::{HandleContext, HandleGraph, HandleId, HandleResource};

type Journal = Arc<Mutex<Vec<String>>>;

/// 记录 create/destroy 调用，并检查创建时所有依赖都已存在
struct Probe {
    name: String,
    journal: Journal,
    orphan_creations: Arc<Mutex<Vec<String>>>,
}

impl HandleResource for Probe {
    fn create_impl(&mut self, ctx: &HandleContext<'_>) -> bool {
        if !ctx.dependencies().all(|dependency| ctx.is_created(dependency)) {
            self.orphan_creations.lock().unwrap().push(self.name.clone());
        }
        self.journal.lock().unwrap().push(format!("create {}", self.name));
        true
    }

    fn destroy_impl(&mut self) {
        self.journal.lock().unwrap().push(format!("destroy {}", self.name));
    }
}

#[derive(Default)]
struct Fixture {
    graph: HandleGraph,
    journal: Journal,
    orphan_creations: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn probe(&mut self, name: &str) -> HandleId {
        self.graph.insert(
            name,
            Probe {
                name: name.to_string(),
                journal: self.journal.clone(),
                orphan_creations: self.orphan_creations.clone(),
            },
        )
    }

    fn take_journal(&self) -> Vec<String> {
        std::mem::take(&mut *self.journal.lock().unwrap())
    }
}

struct Presentation {
    fixture: Fixture,
    device: HandleId,
    surface: HandleId,
    swapchain: HandleId,
}

fn presentation() -> Presentation {
    let mut fixture = Fixture::default();
    let device = fixture.probe("device");
    let surface = fixture.probe("surface");
    let swapchain = fixture.probe("swapchain");
    fixture.graph.add_dependency(surface, device).unwrap();
    fixture.graph.add_dependency(swapchain, device).unwrap();
    fixture.graph.add_dependency(swapchain, surface).unwrap();
    Presentation {
        fixture,
        device,
        surface,
        swapchain,
    }
}

#[test]
fn test_swapchain_first_use_creates_device_and_surface() {
    let Presentation {
        mut fixture,
        device,
        surface,
        swapchain,
    } = presentation();

    assert!(fixture.graph.create(swapchain).unwrap());
    assert!(fixture.graph.is_created(device));
    assert!(fixture.graph.is_created(surface));
    assert!(fixture.graph.is_created(swapchain));
    assert_eq!(fixture.take_journal(), ["create device", "create surface", "create swapchain"]);
}

#[test]
fn test_device_rebuild_tears_down_and_restores_presentation() {
    let Presentation {
        mut fixture,
        device,
        surface,
        swapchain,
    } = presentation();
    fixture.graph.create(swapchain).unwrap();
    fixture.take_journal();

    assert!(fixture.graph.create(device).unwrap());
    assert!(fixture.graph.is_created(device));
    assert!(fixture.graph.is_created(surface));
    assert!(fixture.graph.is_created(swapchain));
    assert_eq!(
        fixture.take_journal(),
        [
            "destroy swapchain",
            "destroy surface",
            "destroy device",
            "create device",
            "create surface",
            "create swapchain",
        ]
    );
}

#[test]
fn test_surface_rebuild_keeps_device() {
    let Presentation {
        mut fixture,
        device,
        surface,
        swapchain,
    } = presentation();
    fixture.graph.create(swapchain).unwrap();
    fixture.take_journal();

    fixture.graph.create(surface).unwrap();
    assert!(fixture.graph.is_created(device));
    assert!(fixture.graph.is_created(swapchain));
    assert_eq!(
        fixture.take_journal(),
        ["destroy swapchain", "destroy surface", "create surface", "create swapchain"]
    );
}

#[test]
fn test_destroying_surface_leaves_device_alive() {
    let Presentation {
        mut fixture,
        device,
        surface,
        swapchain,
    } = presentation();
    fixture.graph.create(swapchain).unwrap();
    fixture.take_journal();

    fixture.graph.destroy(surface).unwrap();
    assert!(fixture.graph.is_created(device));
    assert!(!fixture.graph.is_created(surface));
    assert!(!fixture.graph.is_created(swapchain));
    assert_eq!(fixture.take_journal(), ["destroy swapchain", "destroy surface"]);

    // 再次使用 swapchain 时只补建缺失的部分
    fixture.graph.ensure_created(swapchain).unwrap();
    assert_eq!(fixture.take_journal(), ["create surface", "create swapchain"]);
}

/// 随机生成的 DAG：节点 i 只依赖编号更小的节点
fn random_dag(rng: &mut StdRng, count: usize) -> (Fixture, Vec<HandleId>) {
    let mut fixture = Fixture::default();
    let ids: Vec<HandleId> = (0..count).map(|i| fixture.probe(&format!("n{i}"))).collect();
    for i in 1..count {
        for j in 0..i {
            if rng.gen_bool(0.25) {
                fixture.graph.add_dependency(ids[i], ids[j]).unwrap();
            }
        }
    }
    (fixture, ids)
}

fn transitive(graph: &HandleGraph, root: HandleId, dependents: bool) -> HashSet<HandleId> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let next: Vec<HandleId> = if dependents {
            graph.dependents(id).collect()
        } else {
            graph.dependencies(id).collect()
        };
        for other in next {
            if seen.insert(other) {
                stack.push(other);
            }
        }
    }
    seen
}

#[test]
fn test_random_dags_create_whole_dependency_closure() {
    let mut rng = StdRng::seed_from_u64(0x7275_7669);
    for _ in 0..32 {
        let (mut fixture, ids) = random_dag(&mut rng, 12);
        let root = ids[rng.gen_range(0..ids.len())];

        assert!(fixture.graph.create(root).unwrap());
        for dependency in transitive(&fixture.graph, root, false) {
            assert!(fixture.graph.is_created(dependency));
        }
        assert!(fixture.orphan_creations.lock().unwrap().is_empty());
    }
}

#[test]
fn test_random_dags_recreate_preserves_live_handles() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..32 {
        let (mut fixture, ids) = random_dag(&mut rng, 12);
        for &id in &ids {
            fixture.graph.ensure_created(id).unwrap();
        }
        let target = ids[rng.gen_range(0..ids.len())];

        assert!(fixture.graph.create(target).unwrap());
        for &id in &ids {
            assert!(fixture.graph.is_created(id), "{:?} lost after recreating {:?}", id, target);
        }
        assert!(fixture.orphan_creations.lock().unwrap().is_empty());
    }
}

#[test]
fn test_random_dags_destroy_only_reaches_dependents() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..32 {
        let (mut fixture, ids) = random_dag(&mut rng, 12);
        for &id in &ids {
            fixture.graph.ensure_created(id).unwrap();
        }
        let target = ids[rng.gen_range(0..ids.len())];
        let dependents = transitive(&fixture.graph, target, true);

        fixture.graph.destroy(target).unwrap();
        for &id in &ids {
            let expect_alive = id != target && !dependents.contains(&id);
            assert_eq!(fixture.graph.is_created(id), expect_alive);
        }
    }
}
