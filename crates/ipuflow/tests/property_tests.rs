// Property tests - Options, argument binding, batching and optimizer conversion

use ipuflow::batch::BatchReshaper;
use ipuflow::prelude::*;
use proptest::prelude::*;

fn declared_keys() -> Vec<&'static str> {
    vec![
        "replication_factor",
        "device_iterations",
        "log_dir",
        "profile",
        "anchor_mode",
        "anchor_return_period",
        "use_model",
        "connection_type",
        "sync_pattern",
    ]
}

fn signature(required: usize, optional: usize) -> Signature {
    let sig = (0..required).fold(Signature::new(), |s, i| s.required(format!("r{i}")));
    (0..optional).fold(sig, |s, i| s.optional(format!("o{i}"), i as i64))
}

fn positional(n: usize) -> CallArgs {
    (0..n).fold(CallArgs::new(), |c, i| c.arg(i as i64))
}

// Options

proptest! {
    #[test]
    fn prop_set_undeclared_key_fails_create_or_set_declares(
        key in "[a-z_]{3,16}",
        value in any::<i64>(),
        update in any::<i64>(),
    ) {
        prop_assume!(!declared_keys().contains(&key.as_str()));
        let mut opts = Options::new();
        let is_invalid = matches!(opts.set(&key, value), Err(Error::InvalidOption { .. }));
        prop_assert!(is_invalid);

        opts.create_or_set(&key, value).unwrap();
        prop_assert_eq!(opts.get(&key).unwrap().as_int(), Some(value));
        opts.set(&key, update).unwrap();
        prop_assert_eq!(opts.get(&key).unwrap().as_int(), Some(update));
        let mismatch = matches!(opts.set(&key, true), Err(Error::TypeMismatch { .. }));
        prop_assert!(mismatch);
    }

    #[test]
    fn prop_period_forced_to_one_outside_every_n(
        period in 0u32..1000,
        mode in prop_oneof![
            Just(AnchorMode::Final),
            Just(AnchorMode::All),
            Just(AnchorMode::Sum),
        ],
    ) {
        let opts = Options::new().with_anchor_mode(mode, Some(period)).unwrap();
        prop_assert_eq!(opts.anchor_return_period(), 1);
        prop_assert_eq!(opts.anchor_mode(), Some(mode));
    }

    #[test]
    fn prop_every_n_keeps_positive_period(period in 1u32..1000) {
        let opts = Options::new()
            .with_anchor_mode(AnchorMode::EveryN, Some(period))
            .unwrap();
        prop_assert_eq!(opts.anchor_return_period(), i64::from(period));
        prop_assert!(opts.to_dict().is_ok());
    }

    #[test]
    fn prop_unresolved_anchor_never_serialises(
        iterations in 1u32..64,
        replicas in 1u32..8,
    ) {
        let opts = Options::new()
            .with_device_iterations(iterations)
            .with_replication_factor(replicas);
        let unresolved = matches!(opts.to_dict(), Err(Error::UnresolvedAnchorMode));
        prop_assert!(unresolved);
    }
}

// Argument binding

proptest! {
    #[test]
    fn prop_too_few_arguments_is_missing_mandatory(
        required in 1usize..6,
        optional in 0usize..4,
        supplied in 0usize..6,
    ) {
        prop_assume!(supplied < required);
        let err = Binding::bind(&signature(required, optional), &positional(supplied)).unwrap_err();
        let is_missing = matches!(err, Error::MissingMandatoryArgument { .. });
        prop_assert!(is_missing);
    }

    #[test]
    fn prop_too_many_arguments(
        required in 0usize..5,
        optional in 0usize..5,
        extra in 1usize..4,
    ) {
        let err = Binding::bind(
            &signature(required, optional),
            &positional(required + optional + extra),
        )
        .unwrap_err();
        let too_many = matches!(err, Error::TooManyArguments { .. });
        prop_assert!(too_many);
    }

    #[test]
    fn prop_in_range_binds_every_parameter(
        required in 0usize..5,
        optional in 0usize..5,
        supplied_optional in 0usize..5,
    ) {
        prop_assume!(supplied_optional <= optional);
        let b = Binding::bind(
            &signature(required, optional),
            &positional(required + supplied_optional),
        )
        .unwrap();
        // Non-None defaults fill in the rest.
        prop_assert_eq!(b.len(), required + optional);
    }

    #[test]
    fn prop_keyword_repeating_positional_is_duplicate(
        required in 1usize..5,
        optional in 0usize..3,
        pick in 0usize..5,
        extra in 0usize..4,
    ) {
        let index = pick % required;
        let mut call = positional(required);
        call = call.kwarg(format!("r{index}"), 99_i64);
        for i in 0..extra {
            call = call.arg(i as i64);
        }
        let err = Binding::bind(&signature(required, optional), &call).unwrap_err();
        let duplicate = matches!(err, Error::DuplicateArgument { .. });
        prop_assert!(duplicate);
    }

    #[test]
    fn prop_keyword_after_none_default_fails(
        required in 0usize..4,
        nones in 1usize..4,
        target in 0usize..4,
    ) {
        let mut sig = signature(required, 0);
        for i in 0..nones + 1 {
            sig = sig.optional(format!("n{i}"), ArgTree::none());
        }
        let index = 1 + target % nones;
        let call = positional(required).kwarg(format!("n{index}"), 1_i64);
        let err = Binding::bind(&sig, &call).unwrap_err();
        let trailing = matches!(err, Error::TrailingTensorAfterNone { .. });
        prop_assert!(trailing);
    }
}

// Batching

proptest! {
    #[test]
    fn prop_divisible_batch_narrows_to_k(
        k in 1usize..8,
        iterations in 1usize..5,
        replicas in 1usize..4,
        accumulation in 1usize..4,
    ) {
        let r = BatchReshaper::new(iterations, replicas, accumulation);
        let rows = k * r.multiplier().unwrap();
        let t = HostTensor::zeros((rows, 2), DType::F32);
        let narrowed = r.narrow(&t).unwrap();
        prop_assert_eq!(narrowed.dims(), &[k, 2][..]);
        prop_assert!(narrowed.shares_storage(&t));
    }

    #[test]
    fn prop_indivisible_batch_names_every_factor(
        rows in 1usize..200,
        iterations in 1usize..5,
        replicas in 1usize..4,
        accumulation in 1usize..4,
    ) {
        let r = BatchReshaper::new(iterations, replicas, accumulation);
        prop_assume!(rows % r.multiplier().unwrap() != 0);
        let t = HostTensor::zeros(rows, DType::F32);
        match r.narrow(&t) {
            Err(Error::BatchDimension {
                batch_size,
                device_iterations,
                replication_factor,
                gradient_accumulation,
                multiplier,
                ..
            }) => {
                prop_assert_eq!(batch_size, rows);
                prop_assert_eq!(device_iterations, iterations);
                prop_assert_eq!(replication_factor, replicas);
                prop_assert_eq!(gradient_accumulation, accumulation);
                prop_assert_eq!(multiplier, iterations * replicas * accumulation);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}

// Optimizers

proptest! {
    #[test]
    fn prop_descriptor_conversion_is_idempotent(
        lr in 1e-6f64..1.0,
        momentum in prop_oneof![Just(0.0f64), 0.0f64..0.99],
        weight_decay in prop_oneof![Just(0.0f64), 0.0f64..0.1],
        adam in any::<bool>(),
    ) {
        let opt = if adam {
            HostOptimizer::adam(lr).with_weight_decay(weight_decay)
        } else {
            HostOptimizer::sgd(lr)
                .with_momentum(momentum)
                .with_weight_decay(weight_decay)
        };
        let a = OptimizerDescriptor::from_optimizer(&opt).unwrap();
        let b = OptimizerDescriptor::from_optimizer(&opt).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.get("lr"), Some((lr, false)));
        prop_assert_eq!(a.get("weight_decay"), Some((weight_decay, weight_decay == 0.0)));
    }
}
