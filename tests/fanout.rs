use super::*;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// A structurally valid block template with sixteen reserved bytes of
/// miner-tx extra for the fan-out slots.
fn block_template() -> (Vec<u8>, usize) {
    let mut blob = Vec::new();
    write_varint(&mut blob, 12);
    write_varint(&mut blob, 12);
    write_varint(&mut blob, 1_600_000_000);
    blob.extend_from_slice(&[0x11; 32]);
    blob.extend_from_slice(&[0, 0, 0, 0]);
    write_varint(&mut blob, 2);
    write_varint(&mut blob, 1_600_060_000);
    write_varint(&mut blob, 1);
    blob.push(0xff);
    write_varint(&mut blob, 2_000_000);
    write_varint(&mut blob, 1);
    write_varint(&mut blob, 600_000_000_000);
    blob.push(0x02);
    blob.extend_from_slice(&[0x22; 32]);
    write_varint(&mut blob, 16);
    let extra_offset = blob.len();
    blob.extend_from_slice(&[0u8; 16]);
    blob.push(0x00);
    write_varint(&mut blob, 0);
    (blob, extra_offset)
}

fn template_job() -> JobParams {
    let (blob, extra_offset) = block_template();
    JobParams {
        blocktemplate_blob: hex::encode(blob),
        job_id: "bt-1".into(),
        difficulty: Some(480_000),
        height: Some(2_000_000),
        reserved_offset: Some(extra_offset as u64),
        client_nonce_offset: Some(extra_offset as u64 + 4),
        client_pool_offset: Some(extra_offset as u64 + 8),
        target_diff: Some(30_000),
        ..Default::default()
    }
}

fn nicehash_job() -> JobParams {
    JobParams {
        blob: hex::encode([0u8; 76]),
        job_id: "nh-1".into(),
        target: "ffffffff".into(),
        ..Default::default()
    }
}

fn algorithm() -> Algorithm {
    Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1)
}

#[test]
fn nicehash_template_serves_exactly_255_workers() {
    let mut template = JobTemplate::from_job_params(&nicehash_job(), algorithm()).unwrap();

    let mut served = Vec::new();
    for _ in 0..300 {
        match template
            .get_job_for(Uuid::new_v4(), WorkerType::Miner)
            .unwrap()
        {
            Some(MintedJob::Miner(job)) => served.push(job),
            Some(MintedJob::SubTemplate(_)) => panic!("unexpected subtemplate"),
            None => break,
        }
    }

    pretty_assert_eq!(served.len(), 255);

    let nice_hashes: Vec<u8> = served.iter().map(|job| job.blob.nice_hash()).collect();
    pretty_assert_eq!(nice_hashes, (1..=255).collect::<Vec<u8>>());

    for _ in 0..45 {
        assert!(
            template
                .get_job_for(Uuid::new_v4(), WorkerType::Miner)
                .unwrap()
                .is_none()
        );
    }
}

#[test]
fn master_template_fan_out_and_share_rewrite() {
    let mut template = JobTemplate::from_job_params(&template_job(), algorithm()).unwrap();

    // Three downstream proxies take whole subtemplates (pool nonces 1..3).
    let mut subtemplates = Vec::new();
    for _ in 0..3 {
        let Some(MintedJob::SubTemplate(params)) = template
            .get_job_for(Uuid::new_v4(), WorkerType::Proxy)
            .unwrap()
        else {
            panic!("expected a subtemplate");
        };
        assert!(params.is_template());
        subtemplates.push(params);
    }

    let pool_nonces: Vec<u32> = subtemplates
        .iter()
        .map(|params| params.to_blob().unwrap().client_pool())
        .collect();
    pretty_assert_eq!(pool_nonces, vec![1, 2, 3]);

    // Five miners share the fourth subtemplate.
    let mut jobs = Vec::new();
    for _ in 0..5 {
        let Some(MintedJob::Miner(job)) = template
            .get_job_for(Uuid::new_v4(), WorkerType::Miner)
            .unwrap()
        else {
            panic!("expected a miner job");
        };
        assert!(!job.blob.is_template());
        pretty_assert_eq!(job.target, difficulty_to_target(30_000));
        jobs.push(job);
    }

    // Each miner share is rewritten onto the template path it came from.
    for (i, job) in jobs.iter().enumerate() {
        let result = JobResult::new(job.job_id.clone(), 1000 + i as u32, [0u8; 32]);
        let TemplateVerdict::Forward(forwarded) = template.submit(&result) else {
            panic!("expected the share to forward");
        };

        pretty_assert_eq!(forwarded.job_id, "bt-1");
        pretty_assert_eq!(forwarded.worker_nonce, Some(i as u32 + 1));
        pretty_assert_eq!(forwarded.pool_nonce, Some(4));

        // And the upstream submit carries the path as little-endian hex.
        let submit = forwarded.to_submit("pool-login");
        pretty_assert_eq!(submit.id, "pool-login");
        pretty_assert_eq!(submit.job_id, "bt-1");
        pretty_assert_eq!(
            submit.worker_nonce.as_deref(),
            Some(nonce_to_hex(i as u32 + 1).as_str())
        );
        pretty_assert_eq!(
            submit.pool_nonce.as_deref(),
            Some(nonce_to_hex(4).as_str())
        );
    }
}

#[test]
fn duplicate_share_is_rejected_once_forwarded() {
    let mut template = JobTemplate::from_job_params(&nicehash_job(), algorithm()).unwrap();

    let Some(MintedJob::Miner(job)) = template
        .get_job_for(Uuid::new_v4(), WorkerType::Miner)
        .unwrap()
    else {
        panic!("expected a miner job");
    };

    let result = JobResult::new(job.job_id.clone(), 0x0000_0701, [0u8; 32]);
    assert!(matches!(
        template.submit(&result),
        TemplateVerdict::Forward(_)
    ));
    pretty_assert_eq!(
        template.submit(&result),
        TemplateVerdict::Reject(StratumError::Duplicate)
    );
}

#[test]
fn wire_round_trip_of_a_forwarded_share() {
    let mut template = JobTemplate::from_job_params(&nicehash_job(), algorithm()).unwrap();
    let Some(MintedJob::Miner(job)) = template
        .get_job_for(Uuid::new_v4(), WorkerType::Miner)
        .unwrap()
    else {
        panic!("expected a miner job");
    };

    let result = JobResult::new(job.job_id.clone(), 0x0a0b_0c01, [0x42u8; 32]);
    let TemplateVerdict::Forward(forwarded) = template.submit(&result) else {
        panic!("expected forward");
    };

    // Serialize the upstream submit request and parse it back.
    let submit = forwarded.to_submit("login-id");
    let line = Message::request(
        cnproxy::stratum::Id::Number(7),
        "submit",
        serde_json::to_value(&submit).unwrap(),
    )
    .to_line();

    let parsed: Message = serde_json::from_str(line.trim()).unwrap();
    let Message::Request { method, params, .. } = parsed else {
        panic!("expected a request");
    };
    pretty_assert_eq!(method, "submit");

    let parsed_submit: SubmitParams = serde_json::from_value(params).unwrap();
    let round_trip = JobResult::from_submit(&parsed_submit).unwrap();
    pretty_assert_eq!(round_trip, forwarded);
}

#[test]
fn weighted_rebalance_keeps_pools_proportional() {
    let weights = [0.7, 0.3];

    // One hundred equally fast workers, all starting on pool 0.
    let mut samples: Vec<WorkerSample> = (0..100)
        .map(|_| WorkerSample {
            worker: Uuid::new_v4(),
            hash_rate: 1000.0,
            pool: 0,
        })
        .collect();

    let plan = plan_rebalance(&weights, &samples);
    for assignment in &plan {
        let sample = samples
            .iter_mut()
            .find(|sample| sample.worker == assignment.worker)
            .unwrap();
        sample.pool = assignment.to;
    }

    let on_first = samples.iter().filter(|sample| sample.pool == 0).count();
    assert!((69..=71).contains(&on_first), "pool 0 kept {on_first}");

    // A worker on pool 1 speeds up tenfold; the next round keeps rate
    // totals within ten percent of the mean.
    samples
        .iter_mut()
        .find(|sample| sample.pool == 1)
        .unwrap()
        .hash_rate = 10_000.0;

    let plan = plan_rebalance(&weights, &samples);
    for assignment in &plan {
        let sample = samples
            .iter_mut()
            .find(|sample| sample.worker == assignment.worker)
            .unwrap();
        sample.pool = assignment.to;
    }

    let total: f64 = samples.iter().map(|sample| sample.hash_rate).sum();
    let mean = total / weights.len() as f64;
    for (pool, weight) in weights.iter().enumerate() {
        let rate: f64 = samples
            .iter()
            .filter(|sample| sample.pool == pool)
            .map(|sample| sample.hash_rate)
            .sum();
        let target = total * weight;
        assert!(
            (rate - target).abs() <= mean * 0.1,
            "pool {pool}: {rate} vs target {target}"
        );
    }
}
