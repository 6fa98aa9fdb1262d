use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::{Child, ChildFactory, ChildId};
use crate::core::{Options, TargetSpec};
use crate::ipc::Exchange;
use crate::log::Logger;
use crate::runner::{ResultStream, TargetRunner};
use crate::mlog_debug;

/// A child that runs requests on the calling runtime.
pub struct InProcessChild {
    id: ChildId,
    runner: Arc<dyn TargetRunner>,
    exchange: Exchange,
    logger: Logger,
}

impl InProcessChild {
    pub fn new(runner: Arc<dyn TargetRunner>, logger: Logger) -> Self {
        let id = ChildId::new();
        Self {
            id,
            runner,
            exchange: Exchange::new(id),
            logger,
        }
    }
}

/// Follow `inner` to its end, keeping the exchange in step.
fn track<'a>(inner: ResultStream<'a>, exchange: &'a mut Exchange) -> ResultStream<'a> {
    stream::try_unfold((inner, exchange), |(mut inner, exchange)| async move {
        match inner.next().await {
            Some(Ok(result)) => Ok(Some((result, (inner, exchange)))),
            Some(Err(err)) => Err(exchange.fail(err)),
            None => {
                exchange.finish();
                Ok(None)
            }
        }
    })
    .boxed()
}

fn rejected<'a>(err: crate::Error) -> ResultStream<'a> {
    stream::once(async move { Err(err) }).boxed()
}

impl Child for InProcessChild {
    fn id(&self) -> ChildId {
        self.id
    }

    fn execute_target(&mut self, spec: TargetSpec, extra: Options) -> ResultStream<'_> {
        if let Err(err) = self.exchange.begin() {
            return rejected(err);
        }
        let inner = self.runner.run(spec, extra, self.logger.clone());
        track(inner, &mut self.exchange)
    }

    fn execute_builder(
        &mut self,
        project: String,
        builder: String,
        options: Options,
        target: Option<String>,
    ) -> ResultStream<'_> {
        if let Err(err) = self.exchange.begin() {
            return rejected(err);
        }
        let inner = self
            .runner
            .run_builder(project, builder, options, target, self.logger.clone());
        track(inner, &mut self.exchange)
    }

    fn destroy(&mut self) {
        if self.exchange.close() {
            mlog_debug!("InProcessChild {} destroyed", self.id);
        }
    }
}

/// Creates [`InProcessChild`]ren sharing one runner.
pub struct InProcessChildFactory {
    runner: Arc<dyn TargetRunner>,
    logger: Logger,
}

impl InProcessChildFactory {
    pub fn new(runner: Arc<dyn TargetRunner>, logger: Logger) -> Self {
        Self { runner, logger }
    }
}

impl ChildFactory for InProcessChildFactory {
    fn create(&self) -> Box<dyn Child> {
        Box::new(InProcessChild::new(self.runner.clone(), self.logger.clone()))
    }
}
