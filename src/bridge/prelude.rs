//! Per-context helper object the bridge calls instead of script-visible globals.
use rquickjs::{Ctx, FromJs, Function, Object, function::IntoArgs};

const SOURCE: &str = include_str!("prelude.js");

pub(crate) struct Prelude<'js>(Object<'js>);

impl<'js> Prelude<'js> {
    /// Evaluates the helper source. Runs once, right after the context is created.
    pub fn install(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        ctx.eval(SOURCE)
    }

    pub fn new(object: Object<'js>) -> Self {
        Self(object)
    }

    pub fn call<A, R>(&self, helper: &str, args: A) -> rquickjs::Result<R>
    where
        A: IntoArgs<'js>,
        R: FromJs<'js>,
    {
        let function: Function<'js> = self.0.get(helper)?;
        function.call(args)
    }
}
