//! Shared handler for the conversational intents.

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

const GREETING: &str =
    "Ciao! Sono l'assistente per l'attività ispettiva veterinaria. Posso dirti di cosa \
     trattano i piani di monitoraggio, quali sono in ritardo, quali stabilimenti \
     conviene ispezionare e molto altro. Cosa ti serve?";

const GOODBYE: &str = "Arrivederci, buon lavoro!";

const HELP: &str = "Ecco cosa posso fare per te:\n\
     - **Piani di monitoraggio**: descrizione, elenco, stabilimenti da campionare, ritardi\n\
     - **Priorità di controllo**: stabilimenti da ispezionare per primi, punteggi di rischio\n\
     - **Analisi del rischio**: attività più a rischio, operatori mai ispezionati\n\
     - **Storico**: non conformità e sanzioni di uno stabilimento\n\
     - **Territorio**: stabilimenti vicini a una località\n\
     - **Procedure**: documenti interni e referenti di materia\n\n\
     Prova ad esempio: \"quali piani sono in ritardo?\"";

pub struct SmalltalkTool;

#[async_trait::async_trait]
impl ToolHandler for SmalltalkTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let text = match ctx.intent {
            "goodbye" => GOODBYE,
            "ask_help" => HELP,
            _ => GREETING,
        };
        Ok(ToolResult::formatted("smalltalk", text))
    }
}
