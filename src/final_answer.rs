//! Final Answer Generator (§4.7): one safety-checked streaming completion
//! over the plan's accumulated results, with `<think>` blocks stripped from
//! the outgoing token stream.

use crate::llm::LlmGateway;
use crate::think_strip::ThinkStripper;
use futures::stream::BoxStream;
use futures::StreamExt;

fn results_text(execution_results: &[(String, bool, String)]) -> String {
    execution_results
        .iter()
        .map(|(step_id, success, text)| format!("步骤 {step_id}: {}\n结果: {text}\n\n", if *success { "成功" } else { "失败" }))
        .collect()
}

fn check_prompt(user_query: &str, history: &str, execution_results: &[(String, bool, String)]) -> String {
    format!(
        "根据以下执行结果，检查最后输出的内容是否符合安全标准并生成适当回答。\n\n\
         用户原始问题:\n{user_query}\n\n\
         用户的历史记录: {history}\n\n\
         执行结果:\n{}\n\n\
         请仔细检查内容是否符合法律和道德规范。内容不应包含:\n\
         1. 违法内容(如制作武器、毒品、黑客工具等指南)\n\
         2. 侵犯隐私内容\n\
         3. 仇恨言论或歧视内容\n\
         4. 成人、淫秽或色情内容\n\
         5. 暴力或恐怖内容\n\
         6. 欺诈或误导性内容\n\n\
         处理规则:\n\
         1. 优先考虑最后一步的执行结果:\n\
         - 如果最后一步执行结果(如step_2, step_3等执行链的最后一步)已经完整解决了用户问题，请直接原封不动地输出该步骤的结果内容\n\
         - 无需进行任何格式调整、总结或改写，直接输出最后步骤的content字段内容\n\n\
         2. 仅在以下情况下处理结果:\n\
         - 最后一步执行结果不完整或无法解决用户问题\n\
         - 执行结果包含不适当内容需要修改\n\n\
         3. 安全检查:\n\
         - 如果发现内容包含不适当内容且可以安全修改，请修改后输出\n\
         - 如果包含不适当内容且无法安全修改，请只输出：\"不好意思。根据规则，当前的执行结果不允许输出。\"\n\n\
         4. 输出原则:\n\
         - 始终优先考虑原始输出，尤其是最后一步的执行结果\n\
         - 不要添加任何与执行结果无关的内容\n\
         - 不要创造执行结果中不存在的信息\n\
         - 保持简洁性和可读性\n\
         - 不要在输出中解释或提及执行过程\n",
        results_text(execution_results),
    )
}

/// Streams the final answer for `user_query`, stripping any `<think>` block
/// the model emits before the caller ever sees it. Always prefixes the
/// stream with a single `"最终结果:"` marker line, matching the original
/// behavior of announcing the transition from progress to answer.
pub fn generate_final_answer<'a>(
    gateway: &'a dyn LlmGateway,
    user_query: &'a str,
    history: &'a str,
    execution_results: &'a [(String, bool, String)],
    temperature: f32,
) -> BoxStream<'a, String> {
    let prompt = check_prompt(user_query, history, execution_results);
    let upstream = gateway.complete_stream("你是一个专业的内容检查助手".to_string(), prompt, temperature);

    let marker = futures::stream::once(async { "最终结果:".to_string() });

    let stripped = futures::stream::unfold((upstream, ThinkStripper::new(), false), |(mut upstream, mut stripper, done)| async move {
        if done {
            return None;
        }
        match upstream.next().await {
            Some(Ok(chunk)) => {
                let visible = stripper.push(&chunk);
                Some((visible, (upstream, stripper, false)))
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "final answer stream error");
                Some((String::new(), (upstream, stripper, true)))
            }
            None => {
                let tail = stripper.finish();
                Some((tail, (upstream, stripper, true)))
            }
        }
    })
    .filter(|s| futures::future::ready(!s.is_empty()));

    marker.chain(stripped).boxed()
}
