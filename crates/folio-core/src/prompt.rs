use crate::state::ChatMessage;

const SYSTEM_TEMPLATE: &str = "You are a helpful assistant that answers questions about a personal portfolio. \
Answer only from the context below. \
If the answer is not in the context, say \"I don't know\".\n\n\
Context:\n";

/// Build the engine-facing message list for one turn.
///
/// One system message carrying the retrieved context verbatim, followed by
/// the whole history in order. Pure: same inputs, same output.
pub fn build(context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_instruction(context)));
    messages.extend(history.iter().cloned());
    messages
}

fn system_instruction(context: &str) -> String {
    let mut instruction = String::with_capacity(SYSTEM_TEMPLATE.len() + context.len());
    instruction.push_str(SYSTEM_TEMPLATE);
    instruction.push_str(context);
    instruction
}
