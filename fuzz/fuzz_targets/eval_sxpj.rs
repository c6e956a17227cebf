#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(parsed) = sxpj::parse(s) {
            // A small depth limit keeps runaway recursion cheap
            let mut evaluator = sxpj::Evaluator::with_config(sxpj::EvaluatorConfig {
                max_call_depth: Some(64),
            });
            if let Ok(output) = evaluator.evaluate(&parsed) {
                let _ = output.to_json(sxpj::NullFields::Drop);
            }
        }
    }
});
