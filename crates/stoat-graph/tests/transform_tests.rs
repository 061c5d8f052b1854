// Transform tests — end-to-end value, gradient, and layout behavior of
// the row transforms over sources with and without sequence layouts.

use std::sync::Arc;

use rand::Rng;

use stoat_graph::{
    ComputationNode, FrameRange, ImageHints, Mat, NodeRef, PackingFlags, SourceNode, Transform,
    TransformNode, MODEL_VERSION,
};

fn random_mat(rows: usize, cols: usize) -> Mat<f64> {
    let mut rng = rand::thread_rng();
    let data = (0..rows * cols).map(|_| rng.gen::<f64>()).collect();
    Mat::from_vec(rows, cols, data).unwrap()
}

// Reshape

#[test]
fn test_reshape_round_trip_recovers_input() {
    let data = random_mat(4, 6);
    let src = SourceNode::new("src", 4, 6);
    src.load_minibatch(data.clone()).unwrap();

    let to8 = TransformNode::reshape(
        "to8",
        8,
        ImageHints::default(),
        Arc::clone(&src) as NodeRef<f64>,
    );
    let back = TransformNode::reshape(
        "back",
        4,
        ImageHints::default(),
        Arc::clone(&to8) as NodeRef<f64>,
    );
    to8.validate(true).unwrap();
    back.validate(true).unwrap();
    to8.evaluate(&FrameRange::All).unwrap();
    back.evaluate(&FrameRange::All).unwrap();

    let mid = to8.value();
    let mid = mid.read().unwrap();
    assert_eq!((mid.rows(), mid.cols()), (8, 3));
    assert_eq!(mid.elem_count(), data.elem_count());

    let out = back.value();
    let out = out.read().unwrap();
    assert_eq!((out.rows(), out.cols()), (4, 6));
    for c in 0..6 {
        for r in 0..4 {
            assert_eq!(out.at(r, c), data.at(r, c));
        }
    }
}

#[test]
fn test_reshape_stack_worked_example() {
    // Two parallel sequences of six steps, two features each, fused in
    // groups of three. Columns interleave sequences: col = t * S + s.
    let (s, t_in, k, d) = (2, 6, 3, 2);
    let mut data = Mat::zeros(d, s * t_in);
    for t in 0..t_in {
        *data.at_mut(0, t * s) = (t + 1) as f64;
        *data.at_mut(1, t * s) = (101 + t) as f64;
        *data.at_mut(0, t * s + 1) = (201 + t) as f64;
        *data.at_mut(1, t * s + 1) = (301 + t) as f64;
    }
    let src = SourceNode::with_layout("src", d, s, t_in);
    src.load_minibatch(data).unwrap();

    let node = TransformNode::reshape(
        "fuse",
        d * k,
        ImageHints::default(),
        Arc::clone(&src) as NodeRef<f64>,
    );
    node.validate(true).unwrap();
    node.begin_minibatch().unwrap();
    node.evaluate(&FrameRange::All).unwrap();

    assert_eq!(node.num_parallel_sequences(), 2);
    assert_eq!(node.num_time_steps(), 2);

    let out = node.value();
    let out = out.read().unwrap();
    assert_eq!((out.rows(), out.cols()), (6, 4));
    // Output step 0 of sequence 0 stacks input steps 0, 1, 2.
    let expected: [[f64; 6]; 4] = [
        [1.0, 101.0, 2.0, 102.0, 3.0, 103.0],
        [201.0, 301.0, 202.0, 302.0, 203.0, 303.0],
        [4.0, 104.0, 5.0, 105.0, 6.0, 106.0],
        [204.0, 304.0, 205.0, 305.0, 206.0, 306.0],
    ];
    for (c, col) in expected.iter().enumerate() {
        for (r, &v) in col.iter().enumerate() {
            assert_eq!(out.at(r, c), v, "mismatch at ({r}, {c})");
        }
    }
}

#[test]
fn test_reshape_partial_frame_matches_full() {
    let (s, t_in, k, d) = (2, 6, 3, 2);
    let data = random_mat(d, s * t_in);

    let src_full = SourceNode::with_layout("src", d, s, t_in);
    src_full.load_minibatch(data.clone()).unwrap();
    let full = TransformNode::reshape(
        "full",
        d * k,
        ImageHints::default(),
        Arc::clone(&src_full) as NodeRef<f64>,
    );
    full.validate(true).unwrap();
    full.begin_minibatch().unwrap();
    full.evaluate(&FrameRange::All).unwrap();

    let src_part = SourceNode::with_layout("src", d, s, t_in);
    src_part.load_minibatch(data).unwrap();
    let part = TransformNode::reshape(
        "part",
        d * k,
        ImageHints::default(),
        Arc::clone(&src_part) as NodeRef<f64>,
    );
    part.validate(true).unwrap();
    part.begin_minibatch().unwrap();
    part.evaluate(&FrameRange::frame(1)).unwrap();

    let want = full.value();
    let want = want.read().unwrap();
    let got = part.value();
    let got = got.read().unwrap();
    for r in 0..d * k {
        // Output step 1 occupies columns 2..4; everything else untouched.
        assert_eq!(got.at(r, 2), want.at(r, 2));
        assert_eq!(got.at(r, 3), want.at(r, 3));
        assert_eq!(got.at(r, 0), 0.0);
        assert_eq!(got.at(r, 1), 0.0);
    }
}

#[test]
fn test_reshape_layout_derivation_propagates_flags() {
    let src = SourceNode::<f64>::with_layout("src", 2, 2, 6);
    {
        let h = src.layout_handle().unwrap();
        let mut l = h.write().unwrap();
        l.set(0, 0, PackingFlags::SEQUENCE_START).unwrap();
        l.set(0, 5, PackingFlags::SEQUENCE_END).unwrap();
        // Sequence slot 1 is shorter; its last fused group is all padding.
        l.set(1, 0, PackingFlags::SEQUENCE_START).unwrap();
        l.set(1, 2, PackingFlags::SEQUENCE_END).unwrap();
        for t in 3..6 {
            l.set(1, t, PackingFlags::GAP).unwrap();
        }
    }
    let node = TransformNode::reshape(
        "fuse",
        6,
        ImageHints::default(),
        Arc::clone(&src) as NodeRef<f64>,
    );
    node.validate(true).unwrap();
    node.begin_minibatch().unwrap();

    let out = node.layout().handle().unwrap().read().unwrap().clone();
    assert_eq!(out.num_time_steps(), 2);
    assert!(out.is(0, 0, PackingFlags::SEQUENCE_START).unwrap());
    assert!(out.is(0, 1, PackingFlags::SEQUENCE_END).unwrap());
    assert!(!out.is(0, 0, PackingFlags::GAP).unwrap());
    assert!(out.is(1, 0, PackingFlags::SEQUENCE_START).unwrap());
    assert!(out.is(1, 0, PackingFlags::SEQUENCE_END).unwrap());
    assert!(out.is(1, 1, PackingFlags::GAP).unwrap());
}

#[test]
fn test_reshape_layout_derivation_rejects_misaligned_start() {
    let src = SourceNode::<f64>::with_layout("src", 2, 1, 6);
    {
        let h = src.layout_handle().unwrap();
        // A sequence starting mid-group cannot be fused.
        h.write().unwrap().set(0, 1, PackingFlags::SEQUENCE_START).unwrap();
    }
    let node = TransformNode::reshape(
        "fuse",
        6,
        ImageHints::default(),
        Arc::clone(&src) as NodeRef<f64>,
    );
    node.validate(true).unwrap();
    let err = node.begin_minibatch().unwrap_err();
    assert!(err.to_string().contains("SequenceStart"));
}

#[test]
fn test_reshape_layout_derivation_rejects_partial_gap() {
    let src = SourceNode::<f64>::with_layout("src", 2, 1, 6);
    {
        let h = src.layout_handle().unwrap();
        h.write().unwrap().set(0, 4, PackingFlags::GAP).unwrap();
    }
    let node = TransformNode::reshape(
        "fuse",
        6,
        ImageHints::default(),
        Arc::clone(&src) as NodeRef<f64>,
    );
    node.validate(true).unwrap();
    let err = node.begin_minibatch().unwrap_err();
    assert!(err.to_string().contains("Gap"));
}

#[test]
fn test_reshape_hints_follow_target() {
    let src: NodeRef<f64> = SourceNode::new("src", 4, 6);
    let node = TransformNode::reshape("reshape", 8, ImageHints::new(2, 0, 4), src);
    node.validate(true).unwrap();
    // Missing height derived from the target row count: 8 / (2 * 4) = 1.
    assert_eq!(node.output_hints(), ImageHints::new(2, 1, 4));
}

// RowSlice

#[test]
fn test_overlapping_slices_accumulate_gradients() {
    let src = SourceNode::<f64>::new("src", 4, 2);
    let a = TransformNode::row_slice("a", 0, 3, Arc::clone(&src) as NodeRef<f64>);
    let b = TransformNode::row_slice("b", 2, 2, Arc::clone(&src) as NodeRef<f64>);
    a.validate(true).unwrap();
    b.validate(true).unwrap();

    a.gradient().write().unwrap().fill(1.0);
    b.gradient().write().unwrap().fill(10.0);
    a.backpropagate(0, &FrameRange::All).unwrap();
    b.backpropagate(0, &FrameRange::All).unwrap();

    let g = src.gradient();
    let g = g.read().unwrap();
    for c in 0..2 {
        assert_eq!(g.at(0, c), 1.0);
        assert_eq!(g.at(1, c), 1.0);
        assert_eq!(g.at(2, c), 11.0);
        assert_eq!(g.at(3, c), 10.0);
    }
}

#[test]
fn test_slice_partial_frame_touches_one_step() {
    let src = SourceNode::with_layout("src", 3, 2, 2);
    src.load_minibatch(random_mat(3, 4)).unwrap();
    let node = TransformNode::row_slice("slice", 1, 2, Arc::clone(&src) as NodeRef<f64>);
    node.validate(true).unwrap();
    node.evaluate(&FrameRange::frame(1)).unwrap();

    let out = node.value();
    let out = out.read().unwrap();
    let input = src.value();
    let input = input.read().unwrap();
    for c in 2..4 {
        assert_eq!(out.at(0, c), input.at(1, c));
        assert_eq!(out.at(1, c), input.at(2, c));
    }
    assert_eq!(out.at(0, 0), 0.0);
    assert_eq!(out.at(0, 1), 0.0);
}

#[test]
fn test_slice_partial_frame_backprop_touches_one_step() {
    let src = SourceNode::<f64>::with_layout("src", 3, 2, 2);
    let node = TransformNode::row_slice("slice", 1, 2, Arc::clone(&src) as NodeRef<f64>);
    node.validate(true).unwrap();

    node.gradient().write().unwrap().fill(1.0);
    node.backpropagate(0, &FrameRange::frame(1)).unwrap();

    let g = src.gradient();
    let g = g.read().unwrap();
    // Output step 1 occupies columns 2..4; step 0 stays untouched.
    for c in 2..4 {
        assert_eq!(g.at(0, c), 0.0);
        assert_eq!(g.at(1, c), 1.0);
        assert_eq!(g.at(2, c), 1.0);
    }
    for c in 0..2 {
        assert_eq!(g.at(1, c), 0.0);
        assert_eq!(g.at(2, c), 0.0);
    }
}

#[test]
fn test_repeat_partial_frame_backprop_matches_full() {
    let grad = random_mat(4, 6);

    let run = |frames: &[FrameRange]| {
        let src = SourceNode::<f64>::with_layout("src", 2, 2, 3);
        let node = TransformNode::row_repeat("rep", 2, Arc::clone(&src) as NodeRef<f64>);
        node.validate(true).unwrap();
        *node.gradient().write().unwrap() = grad.clone();
        for f in frames {
            node.backpropagate(0, f).unwrap();
        }
        src.gradient().read().unwrap().clone()
    };

    let full = run(&[FrameRange::All]);
    let stepwise = run(&[
        FrameRange::frame(0),
        FrameRange::frame(1),
        FrameRange::frame(2),
    ]);
    for r in 0..2 {
        for c in 0..6 {
            assert_eq!(stepwise.at(r, c), full.at(r, c));
        }
    }
}

// RowStack

#[test]
fn test_stack_inherits_layout_from_first_input() {
    let a = SourceNode::<f64>::with_layout("a", 2, 2, 3);
    let b = SourceNode::<f64>::with_layout("b", 3, 2, 3);
    let node = TransformNode::row_stack(
        "stack",
        vec![Arc::clone(&a) as NodeRef<f64>, Arc::clone(&b) as NodeRef<f64>],
    );
    node.validate(true).unwrap();
    assert_eq!(node.rows(), 5);
    assert_eq!(node.num_parallel_sequences(), 2);
    let ah = a.layout_handle().unwrap();
    let nh = node.layout().handle().cloned().unwrap();
    assert!(Arc::ptr_eq(&ah, &nh));
}

#[test]
fn test_stack_offsets_follow_revalidation() {
    let a = SourceNode::<f64>::new("a", 2, 2);
    let b = SourceNode::<f64>::new("b", 3, 2);
    let node = TransformNode::row_stack(
        "stack",
        vec![Arc::clone(&a) as NodeRef<f64>, Arc::clone(&b) as NodeRef<f64>],
    );
    node.validate(true).unwrap();
    assert_eq!(node.kind(), Transform::RowStack { offsets: vec![0, 2] });

    // Rewire the first slot to a taller input; offsets are rederived.
    let c: NodeRef<f64> = SourceNode::new("c", 4, 2);
    node.attach_input(0, Arc::clone(&c)).unwrap();
    node.validate(true).unwrap();
    assert_eq!(node.kind(), Transform::RowStack { offsets: vec![0, 4] });

    // The input count itself is not fixed either.
    node.set_inputs(vec![c, Arc::clone(&a) as NodeRef<f64>, b as NodeRef<f64>]);
    node.validate(true).unwrap();
    assert_eq!(node.kind(), Transform::RowStack { offsets: vec![0, 4, 6] });
    assert_eq!(node.rows(), 9);
}

// RowRepeat

#[test]
fn test_repeat_partial_frame() {
    let src = SourceNode::with_layout("src", 2, 1, 3);
    src.load_minibatch(random_mat(2, 3)).unwrap();
    let node = TransformNode::row_repeat("rep", 2, Arc::clone(&src) as NodeRef<f64>);
    node.validate(true).unwrap();
    node.evaluate(&FrameRange::frame(2)).unwrap();

    let out = node.value();
    let out = out.read().unwrap();
    let input = src.value();
    let input = input.read().unwrap();
    for r in 0..2 {
        assert_eq!(out.at(r, 2), input.at(r, 2));
        assert_eq!(out.at(r + 2, 2), input.at(r, 2));
        assert_eq!(out.at(r, 0), 0.0);
    }
}

// Persistence

#[test]
fn test_save_load_config_round_trip() {
    let src: NodeRef<f64> = SourceNode::new("src", 6, 2);
    let saved = TransformNode::row_slice("saved", 2, 3, Arc::clone(&src));
    let loaded = TransformNode::row_slice("loaded", 0, 1, Arc::clone(&src));

    let mut buf = Vec::new();
    saved.save_config(&mut buf).unwrap();
    loaded.load_config(&mut buf.as_slice(), MODEL_VERSION).unwrap();
    assert_eq!(loaded.kind(), Transform::RowSlice { start: 2, num_rows: 3 });

    // Loading re-enters the unvalidated state.
    assert!(loaded.evaluate(&FrameRange::All).is_err());
    loaded.validate(true).unwrap();
    assert!(loaded.evaluate(&FrameRange::All).is_ok());
}

#[test]
fn test_load_config_rejects_other_variant() {
    let src: NodeRef<f64> = SourceNode::new("src", 6, 2);
    let saved = TransformNode::row_repeat("saved", 2, Arc::clone(&src));
    let loaded = TransformNode::row_slice("loaded", 0, 1, src);

    let mut buf = Vec::new();
    saved.save_config(&mut buf).unwrap();
    assert!(loaded.load_config(&mut buf.as_slice(), MODEL_VERSION).is_err());
}
