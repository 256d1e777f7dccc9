use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use forgeguard_auth::{
    Action, CapabilitySet, DataScope, Module, ModuleAccess, Principal, PrincipalId, Role, RoleCode,
    RoleId, SessionId, SubModule, TokenCodec, TokenPayload, evaluate,
};

fn token_benchmarks(c: &mut Criterion) {
    let codec = TokenCodec::new("bench-secret-0123456789abcdef0123456789");
    let now = Utc::now();
    let payload = TokenPayload {
        session_id: SessionId::new(),
        principal_id: PrincipalId::new(),
    };
    let token = codec.sign(&payload, Duration::days(30), now).unwrap();

    c.bench_function("token_sign", |b| {
        b.iter(|| codec.sign(black_box(&payload), Duration::days(30), now))
    });
    c.bench_function("token_verify", |b| {
        b.iter(|| codec.verify(black_box(&token), now))
    });
}

fn permission_benchmarks(c: &mut Criterion) {
    let mut caps = CapabilitySet::new();
    for m in 0..20 {
        for s in 0..10 {
            for a in ["view", "create", "edit", "delete", "approve", "export"] {
                caps.insert(
                    format!("module{m}").into(),
                    format!("sub{s}").into(),
                    Action::new(a),
                );
            }
        }
    }

    let principal = Principal {
        id: PrincipalId::new(),
        display_name: "bench".to_string(),
        role: Role {
            id: RoleId::new(),
            code: RoleCode::new("manager"),
            data_scope: DataScope::Project,
            can_manage_subordinates: true,
            capabilities: caps,
        },
        org_unit_id: None,
        group_id: None,
        module_access: ModuleAccess::new(["module1.*", "module7", "module19.*"]),
    };

    let module = Module::new("module19");
    let sub = SubModule::new("sub9");
    let action = Action::new("export");

    c.bench_function("permission_evaluate", |b| {
        b.iter(|| evaluate(black_box(&principal), &module, &sub, &action))
    });
}

criterion_group!(benches, token_benchmarks, permission_benchmarks);
criterion_main!(benches);
