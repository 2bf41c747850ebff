//! End-to-end write/read tests for the field layer.
//!
//! Every test drives the public API against the in-memory column store:
//! build a field tree from a type name, connect it to a sink, append
//! entries, seal the data into a source, and read the entries back
//! through a freshly built tree. Expected column contents are computed by
//! hand, not derived from running the code.

use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use strata::values::raw::{RawBitVec, RawVec, SmallVecHeader};
use strata::{
    ClassInfo, ClusterIndex, ColumnSource, ColumnType, ElementIndex, FieldId, FieldTree,
    MemberInfo, MemoryPageSink, SchemaRule, SchemaRuleKind, SharedSink, SharedSource,
    TypeRegistry, Value, WriteOptions,
};

fn connect_write(tree: &mut FieldTree, options: WriteOptions) -> Arc<Mutex<MemoryPageSink>> {
    let concrete = Arc::new(Mutex::new(MemoryPageSink::new(options)));
    let shared: SharedSink = concrete.clone();
    tree.connect_sink(shared, 0).unwrap();
    concrete
}

/// Drops the write tree and turns the sink into a shared source.
fn seal(tree: FieldTree, sink: Arc<Mutex<MemoryPageSink>>) -> SharedSource {
    drop(tree);
    let sink = Arc::try_unwrap(sink).ok().expect("sink still referenced").into_inner();
    Arc::new(RwLock::new(sink.into_source()))
}

fn read_tree(name: &str, ty: &str, registry: &TypeRegistry, source: &SharedSource) -> FieldTree {
    let mut tree = FieldTree::create(name, ty, registry).unwrap();
    tree.connect_source(source.clone()).unwrap();
    tree
}

fn child(tree: &FieldTree, id: FieldId, i: usize) -> FieldId {
    tree.field(id).children()[i]
}

/// Fills an engine heap-vector value with plain `Copy` elements,
/// discarding whatever the vector held before.
unsafe fn fill_raw_vec<T: Copy>(value: &mut Value, items: &[T]) {
    let vec = value.get_mut::<RawVec>();
    vec.set_len(0);
    if items.len() > vec.capacity() {
        vec.grow_exact(items.len(), size_of::<T>(), align_of::<T>());
    }
    for (i, item) in items.iter().enumerate() {
        (vec.as_ptr() as *mut T).add(i).write(*item);
    }
    vec.set_len(items.len());
}

unsafe fn raw_vec_items<T: Copy>(value: &Value) -> Vec<T> {
    let vec = value.get::<RawVec>();
    (0..vec.len()).map(|i| (vec.as_ptr() as *const T).add(i).read()).collect()
}

// ---- primitives -----------------------------------------------------------

fn roundtrip_primitive<T: Copy + PartialEq + std::fmt::Debug>(ty: &str, values: &[T]) {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", ty, &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    for v in values {
        unsafe { *value.get_mut::<T>() = *v };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("x", ty, &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    for (i, want) in values.iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        assert_eq!(unsafe { *out.get::<T>() }, *want, "{ty} entry {i}");
    }
    rtree.destroy_value(out);
}

#[test]
fn primitive_round_trips() {
    roundtrip_primitive::<bool>("bool", &[true, false, true]);
    roundtrip_primitive::<u8>("char", &[b'a', 0, 0xff]);
    roundtrip_primitive::<i8>("i8", &[-1, 0, 127]);
    roundtrip_primitive::<u8>("u8", &[0, 200, 255]);
    roundtrip_primitive::<i16>("i16", &[-30000, 0, 4]);
    roundtrip_primitive::<u16>("u16", &[0, 7, 65535]);
    roundtrip_primitive::<i32>("i32", &[i32::MIN, -1, i32::MAX]);
    roundtrip_primitive::<u32>("u32", &[0, 1, u32::MAX]);
    roundtrip_primitive::<i64>("i64", &[i64::MIN, 0, i64::MAX]);
    roundtrip_primitive::<u64>("u64", &[0, 42, u64::MAX]);
    roundtrip_primitive::<f32>("f32", &[0.0, -1.5, 3.25]);
    roundtrip_primitive::<f64>("f64", &[0.0, 2.5, -1e300]);
}

#[test]
fn i64_reads_narrow_on_disk_integers() {
    // A 32-bit archive column widens into a 64-bit field with its sign.
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", "i32", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let mut value = tree.new_value(tree.root());
    for v in [-5i32, 1000] {
        unsafe { *value.get_mut::<i32>() = v };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("x", "i64", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { *out.get::<i64>() }, -5);
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { *out.get::<i64>() }, 1000);
    rtree.destroy_value(out);
}

#[test]
fn signed_unsigned_cross_accept_on_read() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", "u32", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let mut value = tree.new_value(tree.root());
    unsafe { *value.get_mut::<u32>() = 7 };
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("x", "i32", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { *out.get::<i32>() }, 7);
    rtree.destroy_value(out);
}

#[test]
fn double32_narrows_real_storage_on_write() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("e", "Double32_t", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    assert_eq!(
        tree.field(tree.root()).columns()[0].column_type(),
        ColumnType::SplitReal32
    );
    let mut value = tree.new_value(tree.root());
    unsafe { *value.get_mut::<f64>() = 1.5 };
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("e", "Double32_t", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { *out.get::<f64>() }, 1.5);
    rtree.destroy_value(out);
}

// ---- strings --------------------------------------------------------------

#[test]
fn string_columns_carry_cluster_local_offsets() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("s", "string", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    for s in ["hello", "", "€"] {
        unsafe { *value.get_mut::<String>() = s.to_string() };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    tree.commit_cluster();

    let index_col = tree.field(tree.root()).columns()[0].handle();
    let char_col = tree.field(tree.root()).columns()[1].handle();
    {
        let sink = sink.lock();
        assert_eq!(sink.index_values(index_col), vec![5, 5, 8]);
        assert_eq!(sink.raw_elements(char_col), "hello€".as_bytes());
    }

    let source = seal(tree, sink);
    let rtree = read_tree("s", "string", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { out.get::<String>() }, "");
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { out.get::<String>() }, "hello");
    rtree.read(&mut out, 2).unwrap();
    assert_eq!(unsafe { out.get::<String>() }, "€");
    rtree.destroy_value(out);
}

#[test]
fn string_cumulative_index_resets_per_cluster() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("s", "string", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    unsafe { *value.get_mut::<String>() = "hello".to_string() };
    tree.append(&value).unwrap();
    tree.commit_cluster();
    unsafe { *value.get_mut::<String>() = "world!".to_string() };
    tree.append(&value).unwrap();
    tree.destroy_value(value);

    let index_col = tree.field(tree.root()).columns()[0].handle();
    assert_eq!(sink.lock().index_values(index_col), vec![5, 6]);

    let source = seal(tree, sink);
    let rtree = read_tree("s", "string", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { out.get::<String>() }, "hello");
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { out.get::<String>() }, "world!");
    rtree.destroy_value(out);
}

// ---- fixed arrays ---------------------------------------------------------

#[test]
fn fixed_arrays_read_entrywise() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("a", "i32[3]", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    for arr in [[1, 2, 3], [4, 5, 6]] {
        unsafe { *value.get_mut::<[i32; 3]>() = arr };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("a", "i32[3]", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { *out.get::<[i32; 3]>() }, [4, 5, 6]);
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { *out.get::<[i32; 3]>() }, [1, 2, 3]);
    rtree.destroy_value(out);
}

// ---- vectors --------------------------------------------------------------

#[test]
fn vectors_of_primitives_round_trip() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("v", "vec<f32>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let entries: [&[f32]; 3] = [&[1.0, 2.0], &[], &[3.0, 4.0, 5.0]];
    let mut value = tree.new_value(tree.root());
    for entry in entries {
        unsafe { fill_raw_vec(&mut value, entry) };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);

    let index_col = tree.field(tree.root()).columns()[0].handle();
    assert_eq!(sink.lock().index_values(index_col), vec![2, 2, 5]);

    let source = seal(tree, sink);
    let rtree = read_tree("v", "vec<f32>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    for (i, want) in entries.iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        assert_eq!(unsafe { raw_vec_items::<f32>(&out) }, *want);
    }
    rtree.destroy_value(out);
}

static TRACKED_CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);
static TRACKED_DESTROYED: AtomicUsize = AtomicUsize::new(0);

fn tracked_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let mut info = ClassInfo::new("Tracked", 4, 4);
    info.members.push(MemberInfo::new("v", "i32", 0));
    info.constructor = Some(Arc::new(|p| {
        TRACKED_CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
        unsafe { (p as *mut i32).write(0) };
    }));
    info.destructor = Some(Arc::new(|_| {
        TRACKED_DESTROYED.fetch_add(1, Ordering::SeqCst);
    }));
    registry.register_class(info);
    registry
}

#[test]
fn vector_reads_preserve_surviving_items() {
    let registry = tracked_registry();
    let mut tree = FieldTree::create("v", "vec<Tracked>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    unsafe { fill_raw_vec::<i32>(&mut value, &[10, 11, 12, 13, 14]) };
    tree.append(&value).unwrap();
    unsafe { fill_raw_vec::<i32>(&mut value, &[20, 21, 22]) };
    tree.append(&value).unwrap();
    unsafe { value.get_mut::<RawVec>().set_len(0) };
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("v", "vec<Tracked>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());

    // First read allocates and constructs all five items.
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { raw_vec_items::<i32>(&out) }, vec![10, 11, 12, 13, 14]);

    // Shrinking to three destroys exactly the two excess items.
    let destroyed_before = TRACKED_DESTROYED.load(Ordering::SeqCst);
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(TRACKED_DESTROYED.load(Ordering::SeqCst) - destroyed_before, 2);
    assert_eq!(unsafe { raw_vec_items::<i32>(&out) }, vec![20, 21, 22]);

    // Growing back within capacity preserves the three survivors and
    // placement-constructs only the new tail.
    let constructed_before = TRACKED_CONSTRUCTED.load(Ordering::SeqCst);
    let destroyed_before = TRACKED_DESTROYED.load(Ordering::SeqCst);
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(TRACKED_CONSTRUCTED.load(Ordering::SeqCst) - constructed_before, 2);
    assert_eq!(TRACKED_DESTROYED.load(Ordering::SeqCst), destroyed_before);
    assert_eq!(unsafe { raw_vec_items::<i32>(&out) }, vec![10, 11, 12, 13, 14]);

    rtree.destroy_value(out);
}

#[test]
fn nested_vectors_of_strings_round_trip() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("vv", "vec<vec<string>>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let entries: Vec<Vec<Vec<&str>>> =
        vec![vec![vec!["a", "bb"], vec![]], vec![vec!["ccc"]]];
    let mut value = tree.new_value(tree.root());
    for entry in &entries {
        unsafe {
            let outer = value.get_mut::<RawVec>();
            // Earlier entries were torn down by destroy/re-fill below.
            outer.set_len(0);
            if !entry.is_empty() {
                outer.grow_exact(entry.len(), size_of::<RawVec>(), align_of::<RawVec>());
            }
            for (i, strs) in entry.iter().enumerate() {
                let inner_ptr = (outer.as_ptr() as *mut RawVec).add(i);
                inner_ptr.write(RawVec::new());
                let inner = &mut *inner_ptr;
                if !strs.is_empty() {
                    inner.grow_exact(strs.len(), size_of::<String>(), align_of::<String>());
                }
                for (j, s) in strs.iter().enumerate() {
                    (inner.as_ptr() as *mut String).add(j).write(s.to_string());
                }
                inner.set_len(strs.len());
            }
            outer.set_len(entry.len());
        }
        tree.append(&value).unwrap();
        // Tear the entry down by hand so the next fill starts clean.
        unsafe {
            let outer = value.get_mut::<RawVec>();
            for i in 0..outer.len() {
                let inner = &mut *(outer.as_ptr() as *mut RawVec).add(i);
                for j in 0..inner.len() {
                    std::ptr::drop_in_place((inner.as_ptr() as *mut String).add(j));
                }
                inner.release_buffer(size_of::<String>(), align_of::<String>());
            }
            outer.set_len(0);
        }
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("vv", "vec<vec<string>>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    for (i, entry) in entries.iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        let outer = unsafe { out.get::<RawVec>() };
        assert_eq!(outer.len(), entry.len());
        for (j, strs) in entry.iter().enumerate() {
            let inner = unsafe { &*(outer.as_ptr() as *const RawVec).add(j) };
            assert_eq!(inner.len(), strs.len());
            for (k, want) in strs.iter().enumerate() {
                let got = unsafe { &*(inner.as_ptr() as *const String).add(k) };
                assert_eq!(got, want);
            }
        }
    }
    rtree.destroy_value(out);
}

// ---- inline-buffered small vectors ---------------------------------------

#[test]
fn small_vectors_round_trip_from_adopted_storage() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("sv", "smallvec<f32>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let items = [1.5f32, -2.0, 8.25];
    let mut backing = items.to_vec();
    let mut value = tree.new_value(tree.root());
    unsafe {
        let header = value.get_mut::<SmallVecHeader>();
        header.begin = backing.as_mut_ptr() as *mut u8;
        header.size = backing.len() as i32;
        // Adopted storage: the vector must not free it.
        header.capacity = -1;
    }
    tree.append(&value).unwrap();
    unsafe {
        let header = value.get_mut::<SmallVecHeader>();
        header.begin = std::ptr::null_mut();
        header.size = 0;
        header.capacity = 0;
    }
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("sv", "smallvec<f32>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    unsafe {
        let header = out.get::<SmallVecHeader>();
        assert_eq!(header.size, 3);
        assert_eq!(header.capacity, 3);
        for (i, want) in items.iter().enumerate() {
            assert_eq!((header.begin as *const f32).add(i).read(), *want);
        }
    }
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { out.get::<SmallVecHeader>() }.size, 0);
    rtree.destroy_value(out);
}

// ---- vectors of bool and bitsets ------------------------------------------

#[test]
fn bool_vectors_pack_bitwise() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("b", "vec<bool>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let entries: [&[bool]; 2] = [&[true, false, true], &[false; 9]];
    let mut value = tree.new_value(tree.root());
    for entry in entries {
        unsafe {
            let bits = value.get_mut::<RawBitVec>();
            bits.resize(entry.len());
            for (i, b) in entry.iter().enumerate() {
                bits.set(i, *b);
            }
        }
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("b", "vec<bool>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    for (i, entry) in entries.iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        let bits = unsafe { out.get::<RawBitVec>() };
        assert_eq!(bits.len(), entry.len());
        for (j, want) in entry.iter().enumerate() {
            assert_eq!(bits.get(j), *want, "entry {i} bit {j}");
        }
    }
    rtree.destroy_value(out);
}

#[test]
fn bitsets_round_trip_word_packed() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("bs", "bitset<66>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    unsafe {
        let words = value.get_mut::<[u64; 2]>();
        words[0] = 1 | (1 << 5);
        words[1] = 0b10; // bit 65
    }
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("bs", "bitset<66>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    unsafe {
        let words = out.get::<[u64; 2]>();
        assert_eq!(words[0], 1 | (1 << 5));
        assert_eq!(words[1], 0b10);
    }
    rtree.destroy_value(out);
}

// ---- enums ----------------------------------------------------------------

#[test]
fn enums_round_trip_through_their_underlying_width() {
    let mut registry = TypeRegistry::new();
    registry.register_enum("Color", "u8").unwrap();
    let mut tree = FieldTree::create("c", "Color", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    for v in [0u8, 2, 200] {
        unsafe { *value.get_mut::<u8>() = v };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("c", "Color", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 2).unwrap();
    assert_eq!(unsafe { *out.get::<u8>() }, 200);
    rtree.destroy_value(out);
}

// ---- pairs, tuples, records -----------------------------------------------

#[test]
fn pairs_and_tuples_round_trip() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("p", "pair<i32,string>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    {
        let mut parts = tree.split_value(&value);
        unsafe {
            *parts[0].get_mut::<i32>() = 5;
            *parts[1].get_mut::<String>() = "first".to_string();
        }
    }
    tree.append(&value).unwrap();
    {
        let mut parts = tree.split_value(&value);
        unsafe {
            *parts[0].get_mut::<i32>() = -9;
            *parts[1].get_mut::<String>() = "second".to_string();
        }
    }
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("p", "pair<i32,string>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 1).unwrap();
    let parts = rtree.split_value(&out);
    assert_eq!(unsafe { *parts[0].get::<i32>() }, -9);
    assert_eq!(unsafe { parts[1].get::<String>() }, "second");
    rtree.destroy_value(out);
}

#[test]
fn reflected_records_fan_out_members_and_bases() {
    let mut registry = TypeRegistry::new();
    registry.register_class({
        let mut base = ClassInfo::new("Base", 4, 4);
        base.members.push(MemberInfo::new("a", "i32", 0));
        base
    });
    registry.register_class({
        let mut derived = ClassInfo::new("Derived", 12, 4);
        derived.bases.push(strata::meta::BaseInfo { class_name: "Base".to_string(), offset: 0 });
        derived.members.push(MemberInfo::new("b", "f32", 4));
        derived.members.push(MemberInfo::new("pts", "f32", 8).with_dims(vec![1]));
        derived
    });

    let mut tree = FieldTree::create("d", "Derived", &registry).unwrap();
    assert_eq!(tree.field(tree.root()).children().len(), 3);
    assert_eq!(tree.qualified_name(child(&tree, tree.root(), 0)), "d.__base_0__");

    let sink = connect_write(&mut tree, WriteOptions::new());
    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Derived {
        a: i32,
        b: f32,
        pts: [f32; 1],
    }
    let mut value = tree.new_value(tree.root());
    unsafe { *value.get_mut::<Derived>() = Derived { a: 7, b: 1.5, pts: [9.0] } };
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("d", "Derived", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { *out.get::<Derived>() }, Derived { a: 7, b: 1.5, pts: [9.0] });
    rtree.destroy_value(out);
}

// ---- variants -------------------------------------------------------------

#[test]
fn variants_emit_switch_records_and_read_back() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("v", "variant<i32,string>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let switch_col = tree.field(tree.root()).columns()[0].handle();
    let tag_offset = size_of::<String>().max(align_of::<String>());

    let mut value = tree.new_value(tree.root());
    unsafe {
        // Switch the freshly constructed value (alternative 1, i32) over
        // to the string alternative.
        let base = value.as_ptr();
        (base as *mut String).write("string".to_string());
        *base.add(tag_offset).cast::<i8>() = 1; // alternative 2
    }
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    {
        let src = source.read();
        let (index, tag) = src.switch_info(switch_col, ElementIndex::Global(0));
        assert_eq!(tag, 2);
        assert_eq!(index.index, 0);
    }

    let rtree = read_tree("v", "variant<i32,string>", &registry, &source);
    let size = rtree.value_size(rtree.root());
    let mut backing = vec![0u64; size.div_ceil(8)];
    let ptr = backing.as_mut_ptr() as *mut u8;
    let mut out = unsafe { rtree.bind_value(rtree.root(), ptr) };
    rtree.read(&mut out, 0).unwrap();
    unsafe {
        assert_eq!(*ptr.add(tag_offset).cast::<i8>(), 1);
        assert_eq!(&*(ptr as *const String), "string");
    }
    rtree.destroy_value(out);
}

#[test]
fn variants_alternate_with_per_alternative_indices() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("v", "variant<i32,f64>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let switch_col = tree.field(tree.root()).columns()[0].handle();
    let tag_offset = 8; // both alternatives are 8-aligned, f64 is largest

    let mut value = tree.new_value(tree.root());
    let entries: [(i8, f64); 4] = [(0, 11.0), (1, 0.5), (0, 22.0), (1, 1.5)];
    for (alt, v) in entries {
        unsafe {
            let base = value.as_ptr();
            if alt == 0 {
                (base as *mut i32).write(v as i32);
            } else {
                (base as *mut f64).write(v);
            }
            *base.add(tag_offset).cast::<i8>() = alt;
        }
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    {
        let src = source.read();
        // Within-tag indices count per alternative.
        assert_eq!(src.switch_info(switch_col, ElementIndex::Global(0)), (ClusterIndex::new(0, 0), 1));
        assert_eq!(src.switch_info(switch_col, ElementIndex::Global(1)), (ClusterIndex::new(0, 0), 2));
        assert_eq!(src.switch_info(switch_col, ElementIndex::Global(2)), (ClusterIndex::new(0, 1), 1));
        assert_eq!(src.switch_info(switch_col, ElementIndex::Global(3)), (ClusterIndex::new(0, 1), 2));
    }

    let rtree = read_tree("v", "variant<i32,f64>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 2).unwrap();
    unsafe {
        assert_eq!(*out.as_ptr().add(tag_offset).cast::<i8>(), 0);
        assert_eq!(*out.get::<i32>(), 22);
    }
    rtree.read(&mut out, 3).unwrap();
    unsafe {
        assert_eq!(*out.as_ptr().add(tag_offset).cast::<i8>(), 1);
        assert_eq!(*out.get::<f64>(), 1.5);
    }
    rtree.destroy_value(out);
}

// ---- nullables ------------------------------------------------------------

#[test]
fn small_nullables_use_the_dense_encoding() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("o", "ptr<u16>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mask_col = tree.field(tree.root()).columns()[0].handle();
    assert_eq!(tree.field(tree.root()).columns()[0].column_type(), ColumnType::Bit);
    let item_field = child(&tree, tree.root(), 0);
    let item_col = tree.field(item_field).columns()[0].handle();

    let mut seven: u16 = 7;
    let mut value = tree.new_value(tree.root());
    tree.append(&value).unwrap(); // null
    unsafe { *value.get_mut::<*mut u8>() = (&mut seven as *mut u16).cast() };
    tree.append(&value).unwrap(); // 7
    unsafe { *value.get_mut::<*mut u8>() = std::ptr::null_mut() };
    tree.append(&value).unwrap(); // null
    tree.destroy_value(value);

    {
        let sink = sink.lock();
        assert_eq!(sink.bit_values(mask_col), vec![false, true, false]);
        // Null rows carry the default (zero) item to keep rows aligned.
        assert_eq!(sink.raw_elements(item_col), vec![0, 0, 7, 0, 0, 0]);
    }

    let source = seal(tree, sink);
    let rtree = read_tree("o", "ptr<u16>", &registry, &source);
    assert!(!rtree.item_index(rtree.root(), 0).unwrap().is_valid());
    assert!(rtree.item_index(rtree.root(), 1).unwrap().is_valid());

    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert!(unsafe { out.get::<*mut u8>() }.is_null());
    rtree.read(&mut out, 1).unwrap();
    unsafe {
        let slot = *out.get::<*mut u8>();
        assert!(!slot.is_null());
        assert_eq!(*(slot as *const u16), 7);
    }
    // present -> absent frees the owned value again
    rtree.read(&mut out, 2).unwrap();
    assert!(unsafe { out.get::<*mut u8>() }.is_null());
    rtree.destroy_value(out);
}

#[test]
fn large_nullables_use_the_sparse_encoding() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("o", "ptr<pair<i32,i32>>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let index_col = tree.field(tree.root()).columns()[0].handle();
    assert_eq!(
        tree.field(tree.root()).columns()[0].column_type(),
        ColumnType::SplitIndex64
    );

    let mut x: [i32; 2] = [1, 2];
    let mut y: [i32; 2] = [3, 4];
    let mut value = tree.new_value(tree.root());
    tree.append(&value).unwrap(); // null
    unsafe { *value.get_mut::<*mut u8>() = x.as_mut_ptr().cast() };
    tree.append(&value).unwrap(); // X
    unsafe { *value.get_mut::<*mut u8>() = std::ptr::null_mut() };
    tree.append(&value).unwrap(); // null
    unsafe { *value.get_mut::<*mut u8>() = y.as_mut_ptr().cast() };
    tree.append(&value).unwrap(); // Y
    unsafe { *value.get_mut::<*mut u8>() = std::ptr::null_mut() };
    tree.destroy_value(value);

    assert_eq!(sink.lock().index_values(index_col), vec![0, 1, 1, 2]);

    let source = seal(tree, sink);
    let rtree = read_tree("o", "ptr<pair<i32,i32>>", &registry, &source);
    assert!(!rtree.item_index(rtree.root(), 0).unwrap().is_valid());
    assert_eq!(rtree.item_index(rtree.root(), 1).unwrap().index, 0);
    assert!(!rtree.item_index(rtree.root(), 2).unwrap().is_valid());
    assert_eq!(rtree.item_index(rtree.root(), 3).unwrap().index, 1);

    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 3).unwrap();
    unsafe {
        let slot = *out.get::<*mut u8>();
        assert_eq!(*(slot as *const [i32; 2]), [3, 4]);
    }
    rtree.read(&mut out, 2).unwrap();
    assert!(unsafe { out.get::<*mut u8>() }.is_null());
    rtree.destroy_value(out);
}

// ---- proxied collections --------------------------------------------------

fn float_bag_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let mut info = ClassInfo::new("FloatBag", size_of::<Vec<f32>>(), align_of::<Vec<f32>>());
    info.proxy = Some(Arc::new(strata::CollectionProxy {
        value_type: "f32".to_string(),
        is_associative: false,
        has_pointers: false,
        needs_destruct: false,
        stride: Some(size_of::<f32>()),
        construct: Arc::new(|p| unsafe { (p as *mut Vec<f32>).write(Vec::new()) }),
        destruct: Arc::new(|p| unsafe { std::ptr::drop_in_place(p as *mut Vec<f32>) }),
        count: Arc::new(|p| unsafe { (*(p as *const Vec<f32>)).len() }),
        allocate: Arc::new(|p, n| unsafe {
            (*(p as *mut Vec<f32>)).resize(n, 0.0);
            p
        }),
        commit: None,
        iter_read: Arc::new(|p, i| unsafe { (*(p as *mut Vec<f32>)).as_mut_ptr().add(i).cast() }),
        iter_write: Arc::new(|p, i| unsafe { (*(p as *mut Vec<f32>)).as_mut_ptr().add(i).cast() }),
    }));
    registry.register_class(info);
    registry
}

#[test]
fn proxied_collections_round_trip() {
    let registry = float_bag_registry();
    let mut tree = FieldTree::create("bag", "FloatBag", &registry).unwrap();
    assert_eq!(tree.field(tree.root()).type_name(), "FloatBag");

    let sink = connect_write(&mut tree, WriteOptions::new());
    let entries: [&[f32]; 3] = [&[0.5, 1.5], &[], &[-3.0]];
    let mut value = tree.new_value(tree.root());
    for entry in entries {
        unsafe {
            let bag = value.get_mut::<Vec<f32>>();
            bag.clear();
            bag.extend_from_slice(entry);
        }
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("bag", "FloatBag", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    for (i, want) in entries.iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        assert_eq!(unsafe { out.get::<Vec<f32>>() }.as_slice(), *want);
    }
    rtree.destroy_value(out);
}

// ---- cardinality ----------------------------------------------------------

#[test]
fn cardinality_fields_decode_collection_sizes() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("hits", "vec<i32>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let mut value = tree.new_value(tree.root());
    for entry in [&[1, 2][..], &[], &[3, 4, 5]] {
        unsafe { fill_raw_vec::<i32>(&mut value, entry) };
        tree.append(&value).unwrap();
    }
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("hits", "cardinality<u64>", &registry, &source);
    assert_eq!(rtree.cardinality_is_wide(rtree.root()), Some(true));
    let mut out = rtree.new_value(rtree.root());
    for (i, want) in [2u64, 0, 3].iter().enumerate() {
        rtree.read(&mut out, i as u64).unwrap();
        assert_eq!(unsafe { *out.get::<u64>() }, *want);
    }
    rtree.destroy_value(out);

    let rtree32 = read_tree("hits", "cardinality<u32>", &registry, &source);
    assert_eq!(rtree32.cardinality_is_wide(rtree32.root()), Some(false));
    let mut out = rtree32.new_value(rtree32.root());
    rtree32.read(&mut out, 2).unwrap();
    assert_eq!(unsafe { *out.get::<u32>() }, 3);
    rtree32.destroy_value(out);
}

#[test]
fn cardinality_fields_reject_appends() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("n", "cardinality<u32>", &registry).unwrap();
    let sink = Arc::new(Mutex::new(MemoryPageSink::new(WriteOptions::new())));
    let shared: SharedSink = sink.clone();
    assert!(tree.connect_sink(shared, 0).is_err());
}

// ---- schema rules ---------------------------------------------------------

#[test]
fn schema_rules_run_on_transient_targets_only() {
    let mut registry = TypeRegistry::new();
    let mut info = ClassInfo::new("Evt", 8, 4);
    info.members.push(MemberInfo::new("x", "i32", 0));
    info.members.push(MemberInfo::new("cache", "i32", 4).transient());
    info.rules.push(SchemaRule {
        kind: SchemaRuleKind::Read,
        targets: vec!["cache".to_string()],
        since_version: 0,
        until_version: u32::MAX,
        func: Arc::new(|p| unsafe { (p.add(4) as *mut i32).write(42) }),
    });
    // Targets a persistent member: skipped with a warning.
    info.rules.push(SchemaRule {
        kind: SchemaRuleKind::Read,
        targets: vec!["x".to_string()],
        since_version: 0,
        until_version: u32::MAX,
        func: Arc::new(|p| unsafe { (p as *mut i32).write(99) }),
    });
    // Unsupported rule type: skipped with a warning.
    info.rules.push(SchemaRule {
        kind: SchemaRuleKind::ReadRaw,
        targets: vec!["cache".to_string()],
        since_version: 0,
        until_version: u32::MAX,
        func: Arc::new(|p| unsafe { (p.add(4) as *mut i32).write(7) }),
    });
    registry.register_class(info);

    let mut tree = FieldTree::create("e", "Evt", &registry).unwrap();
    // The transient member is skipped as a child.
    assert_eq!(tree.field(tree.root()).children().len(), 1);

    let sink = connect_write(&mut tree, WriteOptions::new());
    let mut value = tree.new_value(tree.root());
    unsafe { *value.get_mut::<i32>() = 5 };
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let rtree = read_tree("e", "Evt", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    unsafe {
        assert_eq!(*out.get::<i32>(), 5);
        assert_eq!(*(out.as_ptr().add(4) as *const i32), 42);
    }
    rtree.destroy_value(out);
}

// ---- negotiation failures -------------------------------------------------

#[test]
fn mismatched_on_disk_types_fail_with_context() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", "i32", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let value = tree.new_value(tree.root());
    tree.append(&value).unwrap();
    tree.destroy_value(value);
    let source = seal(tree, sink);

    let mut reader = FieldTree::create("x", "string", &registry).unwrap();
    let err = reader.connect_source(source).unwrap_err().to_string();
    assert!(err.contains("SplitInt32"), "message was: {err}");
    assert!(err.contains('x'), "message was: {err}");
    assert!(err.contains("cannot be matched"), "message was: {err}");
}

#[test]
fn unknown_fields_fail_to_connect() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", "i32", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let source = seal(tree, sink);

    let mut reader = FieldTree::create("missing", "i32", &registry).unwrap();
    let err = reader.connect_source(source).unwrap_err().to_string();
    assert!(err.contains("no on-disk column information"), "message was: {err}");
    assert!(err.contains("missing"), "message was: {err}");
}

#[test]
fn fixed_representatives_reject_source_connections() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("x", "i32", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());
    let source = seal(tree, sink);

    let mut reader = FieldTree::create("x", "i32", &registry).unwrap();
    reader.set_column_representative(reader.root(), &[ColumnType::Int32]).unwrap();
    let err = reader.connect_source(source).unwrap_err().to_string();
    assert!(err.contains("only valid when connecting"), "message was: {err}");
}

// ---- models and clusters --------------------------------------------------

#[test]
fn model_roots_serialize_multiple_fields() {
    let registry = TypeRegistry::new();
    let mut model = FieldTree::new_root();
    let pt = model.attach(model.root(), FieldTree::create("pt", "f32", &registry).unwrap()).unwrap();
    let tag = model
        .attach(model.root(), FieldTree::create("tag", "string", &registry).unwrap())
        .unwrap();

    let sink = connect_write(&mut model, WriteOptions::new());
    let mut pt_value = model.new_value(pt);
    let mut tag_value = model.new_value(tag);
    for (p, t) in [(1.0f32, "a"), (2.0, "bc")] {
        unsafe {
            *pt_value.get_mut::<f32>() = p;
            *tag_value.get_mut::<String>() = t.to_string();
        }
        model.append(&pt_value).unwrap();
        model.append(&tag_value).unwrap();
    }
    model.destroy_value(pt_value);
    model.destroy_value(tag_value);
    let source = seal(model, sink);

    let mut reader = FieldTree::new_root();
    let pt = reader
        .attach(reader.root(), FieldTree::create("pt", "f32", &registry).unwrap())
        .unwrap();
    let tag = reader
        .attach(reader.root(), FieldTree::create("tag", "string", &registry).unwrap())
        .unwrap();
    reader.connect_source(source).unwrap();

    let mut pt_out = reader.new_value(pt);
    let mut tag_out = reader.new_value(tag);
    reader.read(&mut pt_out, 1).unwrap();
    reader.read(&mut tag_out, 1).unwrap();
    assert_eq!(unsafe { *pt_out.get::<f32>() }, 2.0);
    assert_eq!(unsafe { tag_out.get::<String>() }, "bc");
    reader.destroy_value(pt_out);
    reader.destroy_value(tag_out);
}

#[test]
fn collections_spanning_clusters_read_back() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("v", "vec<i32>", &registry).unwrap();
    let sink = connect_write(&mut tree, WriteOptions::new());

    let mut value = tree.new_value(tree.root());
    unsafe { fill_raw_vec::<i32>(&mut value, &[1, 2, 3]) };
    tree.append(&value).unwrap();
    tree.commit_cluster();
    unsafe { fill_raw_vec::<i32>(&mut value, &[4]) };
    tree.append(&value).unwrap();
    tree.destroy_value(value);

    // Cluster-local cumulative counts restart after the commit.
    let index_col = tree.field(tree.root()).columns()[0].handle();
    assert_eq!(sink.lock().index_values(index_col), vec![3, 1]);

    let source = seal(tree, sink);
    let rtree = read_tree("v", "vec<i32>", &registry, &source);
    let mut out = rtree.new_value(rtree.root());
    rtree.read(&mut out, 0).unwrap();
    assert_eq!(unsafe { raw_vec_items::<i32>(&out) }, vec![1, 2, 3]);
    rtree.read(&mut out, 1).unwrap();
    assert_eq!(unsafe { raw_vec_items::<i32>(&out) }, vec![4]);
    rtree.destroy_value(out);
}

#[test]
fn small_cluster_mode_narrows_index_columns() {
    let registry = TypeRegistry::new();
    let mut tree = FieldTree::create("v", "vec<i32>", &registry).unwrap();
    let options = WriteOptions::new().with_small_clusters(true);
    let _sink = connect_write(&mut tree, options);
    assert_eq!(
        tree.field(tree.root()).columns()[0].column_type(),
        ColumnType::SplitIndex32
    );
}
